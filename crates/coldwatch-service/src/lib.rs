//! Monitoring service and control CLI for refrigeration units.
//!
//! This crate provides the `coldwatch` binary and the pieces it is built
//! from:
//! - Configuration loading and validation
//! - A runtime that polls every registered unit, live or in sweeps
//! - CLI argument definitions and output formatting
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/coldwatch/coldwatch.toml`:
//!
//! ```toml
//! [monitor]
//! poll_interval_secs = 15
//! request_timeout_ms = 3000
//! scheme = "https"
//! mode = "live"
//!
//! [sweep]
//! interval_secs = 900
//!
//! [debounce]
//! failure_threshold = 2
//! recency_window_secs = 60
//!
//! [registry]
//! path = "~/.local/share/coldwatch/units.json"
//! refresh_secs = 30
//!
//! [notifications]
//! log = true
//! webhook_url = "https://hooks.example.com/coldwatch"
//! ```

pub mod cli;
pub mod config;
pub mod format;
pub mod runtime;

pub use config::{
    Config, ConfigError, DebounceConfig, MonitorConfig, NotificationsConfig, PollMode,
    RegistryConfig, SweepConfig, ValidationError,
};
pub use runtime::{Runtime, build_sink};
