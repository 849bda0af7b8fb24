//! Output formatting for text and JSON output.

use std::fmt::Write as _;

use anyhow::Result;
use coldwatch_core::SweepReport;
use coldwatch_core::client::{ConfigUpdateResponse, SystemInfo};
use coldwatch_types::{ParsedStatus, PollOutcome, UnitRecord};
use serde::Serialize;
use serde_json::json;

/// Serialize any value as pretty-printed JSON.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

/// One line per unit.
pub fn format_units_text(units: &[UnitRecord]) -> String {
    if units.is_empty() {
        return "No units registered\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:>4}  {:<20} {:<28} {:>5}  KEY", "ID", "NAME", "ADDRESS", "PORT");
    for unit in units {
        let _ = writeln!(
            out,
            "{:>4}  {:<20} {:<28} {:>5}  {}",
            unit.id,
            unit.display_id,
            unit.address,
            unit.port,
            if unit.api_key().is_some() { "set" } else { "-" }
        );
    }
    out
}

/// Units as JSON, without API keys.
pub fn format_units_json(units: &[UnitRecord]) -> Result<String> {
    let redacted: Vec<_> = units
        .iter()
        .map(|u| {
            json!({
                "id": u.id,
                "display_id": u.display_id,
                "address": u.address,
                "port": u.port,
                "position": u.position,
                "has_api_key": u.api_key().is_some(),
            })
        })
        .collect();
    to_json(&redacted)
}

/// Single-probe outcome.
pub fn format_outcome_text(unit: &UnitRecord, outcome: &PollOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: {}",
        unit.display_id,
        if outcome.reachable { "reachable" } else { "unreachable" }
    );
    let _ = writeln!(out, "  Endpoint: {}", outcome.endpoint_tried);
    let _ = writeln!(
        out,
        "  HTTP:     {}",
        outcome
            .http_status
            .map_or_else(|| "none".to_string(), |c| c.to_string())
    );
    if let Some(body) = &outcome.raw_body {
        let _ = writeln!(out, "  Body:     {}", body.trim());
    }
    out
}

/// Interpreted status.
pub fn format_status_text(unit: &UnitRecord, status: &ParsedStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", unit.display_id);
    if let Some(system) = &status.system {
        let version = status.version.as_deref().unwrap_or("?");
        let _ = writeln!(out, "  System:   {} ({})", system, version);
    }
    let _ = writeln!(
        out,
        "  Mode:     {}",
        status.operating_mode.as_deref().unwrap_or("unknown")
    );
    if let Some(setpoint) = status.setpoint {
        let _ = writeln!(out, "  Setpoint: {:.1}", setpoint);
    }
    for (name, value) in &status.sensors {
        let _ = writeln!(out, "  {:<16}{:.1}", format!("{}:", name), value);
    }
    if !status.relays.is_empty() {
        let relays: Vec<String> = status
            .relays
            .iter()
            .map(|(name, state)| format!("{}={}", name, on_off(*state)))
            .collect();
        let _ = writeln!(out, "  Relays:   {}", relays.join(" "));
    }
    if status.alarm_active {
        let _ = writeln!(
            out,
            "  ALARM:    {}",
            status.alarm_description.as_deref().unwrap_or("active")
        );
    } else {
        let _ = writeln!(out, "  Alarms:   none");
    }
    out
}

/// Status as JSON.
pub fn format_status_json(status: &ParsedStatus) -> Result<String> {
    to_json(status)
}

/// Controller configuration, one key per line.
pub fn format_system_info_text(info: &SystemInfo) -> String {
    let width = info.entries.keys().map(String::len).max().unwrap_or(0);
    let mut out = String::new();
    for (key, value) in &info.entries {
        let _ = writeln!(out, "{:<width$}  {}", key, value, width = width);
    }
    out
}

/// Result of a configuration update.
pub fn format_config_update(response: &ConfigUpdateResponse) -> String {
    let mut out = String::new();
    for (key, value) in &response.updated {
        let _ = writeln!(out, "updated  {} = {}", key, value);
    }
    for (key, reason) in &response.skipped {
        let _ = writeln!(out, "skipped  {}: {}", key, reason);
    }
    for (key, reason) in &response.errors {
        let _ = writeln!(out, "error    {}: {}", key, reason);
    }
    if out.is_empty() {
        out.push_str(response.message.as_deref().unwrap_or("No changes"));
        out.push('\n');
    }
    out
}

/// Sweep summary followed by the events it produced.
pub fn format_sweep_text(report: &SweepReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}/{} units online, {} in alarm",
        report.online, report.polled, report.in_alarm
    );
    for event in &report.events {
        match event.message() {
            Some(message) => {
                let _ = writeln!(out, "  {}", message);
            }
            None => {
                let _ = writeln!(out, "  Alarm cleared on {}", event.unit().display_id);
            }
        }
    }
    out
}

/// Sweep summary as JSON.
pub fn format_sweep_json(report: &SweepReport) -> Result<String> {
    to_json(&json!({
        "polled": report.polled,
        "online": report.online,
        "in_alarm": report.in_alarm,
        "events": report.events,
    }))
}
