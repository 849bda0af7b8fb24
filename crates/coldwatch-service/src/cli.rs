//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use time::Date;
use time::format_description::well_known::Iso8601;

use crate::config::PollMode;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Polling mode override for `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// One poll loop per unit
    Live,
    /// All units together on the sweep interval
    Sweep,
}

impl From<ModeArg> for PollMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Live => PollMode::Live,
            ModeArg::Sweep => PollMode::Sweep,
        }
    }
}

/// On/off switch for demo mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

/// Unit selection argument
#[derive(Debug, Clone, Args)]
pub struct UnitArg {
    /// Unit id or display id, or use COLDWATCH_UNIT env var
    #[arg(env = "COLDWATCH_UNIT")]
    pub unit: String,
}

/// Reusable output format arguments
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser)]
#[command(name = "coldwatch")]
#[command(author, version, about = "Health monitoring and control for refrigeration units", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "COLDWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Unit registry file (overrides config)
    #[arg(short, long, global = true)]
    pub registry: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor all registered units until interrupted
    Run {
        /// Polling mode (overrides config)
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Poll every registered unit once
    Sweep {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Probe one unit and print the raw outcome
    Probe {
        #[command(flatten)]
        unit: UnitArg,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Manage registered units
    Units {
        #[command(subcommand)]
        action: UnitsAction,
    },

    /// Show a unit's current status
    Status {
        #[command(flatten)]
        unit: UnitArg,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show a unit's controller configuration
    Info {
        #[command(flatten)]
        unit: UnitArg,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Change a unit's temperature setpoint
    Setpoint {
        #[command(flatten)]
        unit: UnitArg,

        /// New setpoint
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Reset latched alarms on a unit
    ResetAlarms {
        #[command(flatten)]
        unit: UnitArg,
    },

    /// Start a manual defrost on a unit
    Defrost {
        #[command(flatten)]
        unit: UnitArg,
    },

    /// Show or change a unit's demo mode
    Demo {
        #[command(flatten)]
        unit: UnitArg,

        /// Turn demo mode on or off; omit to show the current state
        #[arg(value_enum)]
        state: Option<Toggle>,
    },

    /// Update controller configuration keys
    Config {
        #[command(flatten)]
        unit: UnitArg,

        /// Assignments such as defrost.interval_hours=6
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(String, Value)>,
    },

    /// Print a unit's daily log
    Logs {
        #[command(flatten)]
        unit: UnitArg,

        /// Day to fetch (YYYY-MM-DD, default today in UTC)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<Date>,

        /// Fetch the conditions log instead of the events log
        #[arg(long)]
        conditions: bool,
    },
}

#[derive(Subcommand)]
pub enum UnitsAction {
    /// List registered units
    List {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Register a unit
    Add {
        /// Display id
        name: String,

        /// Host name or IP address
        address: String,

        /// API key
        #[arg(short, long, default_value = "")]
        key: String,

        /// API port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Change a unit's connection details
    Edit {
        #[command(flatten)]
        unit: UnitArg,

        /// New display id
        #[arg(long)]
        name: Option<String>,

        /// New address
        #[arg(long)]
        address: Option<String>,

        /// New API key
        #[arg(short, long)]
        key: Option<String>,

        /// New API port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Remove a unit
    Remove {
        #[command(flatten)]
        unit: UnitArg,
    },

    /// Move a unit to a position in the list (0 is first)
    Move {
        #[command(flatten)]
        unit: UnitArg,

        /// Target position
        index: usize,
    },
}

/// Parse `KEY=VALUE`, reading the value as JSON when it parses as a
/// number, boolean or quoted string and as plain text otherwise.
pub fn parse_assignment(input: &str) -> Result<(String, Value), String> {
    let (key, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", input))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", input));
    }
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<Date, String> {
    Date::parse(input.trim(), &Iso8601::DATE)
        .map_err(|e| format!("invalid date '{}': {} (expected YYYY-MM-DD)", input, e))
}
