//! Interpreting `/api/v1/status` documents.
//!
//! Controllers are not strict about JSON types: flags arrive as booleans,
//! numbers or `"True"` strings, and readings sometimes as strings. The
//! interpreter accepts all of those and drops anything it cannot read, so a
//! sensor that fails to parse is absent rather than zero.
//!
//! # Example
//!
//! ```
//! use coldwatch_core::status::parse_status;
//!
//! let status = parse_status(r#"{
//!     "system_status": "Cooling",
//!     "sensors": {"return_temp": 3.5},
//!     "relays": {"compressor": true},
//!     "active_alarms": [4],
//!     "alarm_warning": false,
//!     "alarm_shutdown": false
//! }"#);
//! assert_eq!(status.operating_mode.as_deref(), Some("Cooling"));
//! assert!(status.alarm_active);
//! assert_eq!(status.alarm_description.as_deref(), Some("Active alarms: 4"));
//! ```

use coldwatch_types::{ParsedStatus, PollOutcome};
use serde_json::{Map, Value};

/// Description used when several alarm codes are active.
const ACTIVE_ALARMS_PREFIX: &str = "Active alarms: ";

/// Parse a status body. Never fails; unusable input yields an empty status.
pub fn parse_status(body: &str) -> ParsedStatus {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(doc)) => from_object(&doc),
        _ => ParsedStatus::default(),
    }
}

/// Interpret a poll outcome. Only reachable outcomes carry a status.
///
/// Any reachable answer counts, including the health fallback, whose body
/// has no alarm fields and therefore reads as alarm-free.
pub fn interpret(outcome: &PollOutcome) -> Option<ParsedStatus> {
    if !outcome.reachable {
        return None;
    }
    Some(
        outcome
            .raw_body
            .as_deref()
            .map(parse_status)
            .unwrap_or_default(),
    )
}

fn from_object(doc: &Map<String, Value>) -> ParsedStatus {
    let mut status = ParsedStatus {
        operating_mode: ["system_status", "operating_mode", "mode"]
            .iter()
            .find_map(|key| doc.get(*key).and_then(as_text)),
        setpoint: doc.get("setpoint").and_then(as_number),
        timestamp: doc.get("timestamp").and_then(as_number).map(|t| t as i64),
        system: doc.get("system").and_then(as_text),
        version: doc.get("version").and_then(as_text),
        ..ParsedStatus::default()
    };

    if let Some(Value::Object(sensors)) = doc.get("sensors") {
        status.sensors = sensors
            .iter()
            .filter_map(|(name, value)| as_number(value).map(|v| (name.clone(), v)))
            .collect();
    }
    if let Some(Value::Object(relays)) = doc.get("relays") {
        status.relays = relays
            .iter()
            .filter_map(|(name, value)| as_flag(value).map(|v| (name.clone(), v)))
            .collect();
    }
    if let Some(Value::Array(codes)) = doc.get("active_alarms") {
        status.alarm_codes = codes.iter().filter_map(as_code).collect();
    }

    let shutdown = doc.get("alarm_shutdown").and_then(as_flag).unwrap_or(false);
    let warning = doc.get("alarm_warning").and_then(as_flag).unwrap_or(false);

    status.alarm_description = if !status.alarm_codes.is_empty() {
        Some(format!(
            "{}{}",
            ACTIVE_ALARMS_PREFIX,
            status.alarm_codes.join(", ")
        ))
    } else if shutdown {
        Some("Shutdown alarm".to_string())
    } else if warning {
        Some("Warning alarm".to_string())
    } else {
        None
    };
    status.alarm_active = status.alarm_description.is_some();

    status
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Some(true),
            "false" | "off" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_code(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::{HEALTH_ENDPOINT, STATUS_ENDPOINT};

    const FULL: &str = r#"{
        "timestamp": 1700000000,
        "system": "Refrigeration Control System",
        "version": "1.4.2",
        "system_status": "Cooling",
        "relays": {"compressor": true, "fan": "True", "valve": false, "electric_heater": 0},
        "sensors": {"return_temp": 3.5, "supply_temp": "-1.25", "coil_temp": "n/a"},
        "setpoint": 2.0,
        "active_alarms": [],
        "alarm_warning": false,
        "alarm_shutdown": false
    }"#;

    #[test]
    fn test_parse_full_document() {
        let status = parse_status(FULL);
        assert_eq!(status.operating_mode.as_deref(), Some("Cooling"));
        assert_eq!(status.sensor("return_temp"), Some(3.5));
        assert_eq!(status.sensor("supply_temp"), Some(-1.25));
        // Unparseable readings stay absent.
        assert_eq!(status.sensor("coil_temp"), None);
        assert_eq!(status.relays.get("compressor"), Some(&true));
        assert_eq!(status.relays.get("fan"), Some(&true));
        assert_eq!(status.relays.get("electric_heater"), Some(&false));
        assert_eq!(status.setpoint, Some(2.0));
        assert_eq!(status.timestamp, Some(1_700_000_000));
        assert_eq!(status.version.as_deref(), Some("1.4.2"));
        assert!(!status.alarm_active);
        assert_eq!(status.alarm_description, None);
    }

    #[test]
    fn test_malformed_json_is_empty() {
        for body in ["{not json", "", "[1,2,3]", "42", "null", "\"text\""] {
            let status = parse_status(body);
            assert!(status.is_empty(), "body {:?}", body);
            assert!(!status.alarm_active);
            assert!(status.sensors.is_empty());
            assert!(status.relays.is_empty());
        }
    }

    #[test]
    fn test_alarm_precedence() {
        let status = parse_status(
            r#"{"active_alarms": ["E04", 7], "alarm_shutdown": true, "alarm_warning": true}"#,
        );
        assert_eq!(status.alarm_codes, vec!["E04", "7"]);
        assert_eq!(
            status.alarm_description.as_deref(),
            Some("Active alarms: E04, 7")
        );

        let status = parse_status(r#"{"active_alarms": [], "alarm_shutdown": true, "alarm_warning": true}"#);
        assert_eq!(status.alarm_description.as_deref(), Some("Shutdown alarm"));
        assert!(status.alarm_active);

        let status = parse_status(r#"{"alarm_warning": "true"}"#);
        assert_eq!(status.alarm_description.as_deref(), Some("Warning alarm"));
    }

    #[test]
    fn test_interpret_only_reachable() {
        let failed = PollOutcome::from_response(STATUS_ENDPOINT, 500, "overload".to_string());
        assert_eq!(interpret(&failed), None);

        let blank = PollOutcome::from_response(STATUS_ENDPOINT, 200, String::new());
        assert_eq!(interpret(&blank), Some(ParsedStatus::default()));

        let ok = PollOutcome::from_response(STATUS_ENDPOINT, 200, FULL.to_string());
        assert_eq!(
            interpret(&ok).and_then(|s| s.operating_mode),
            Some("Cooling".to_string())
        );
    }

    #[test]
    fn test_health_answer_reads_alarm_free() {
        let health =
            PollOutcome::from_response(HEALTH_ENDPOINT, 200, r#"{"status":"ok"}"#.to_string());
        let status = interpret(&health).unwrap();
        assert!(!status.alarm_active);
        assert!(status.alarm_codes.is_empty());
    }
}
