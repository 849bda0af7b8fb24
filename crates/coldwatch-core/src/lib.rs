//! Health polling and alarm reconciliation for networked refrigeration units.
//!
//! Each registered unit runs a small controller that exposes an HTTPS API.
//! This crate polls those controllers, decides from noisy probe results when
//! a unit is really offline or in alarm, and notifies operators exactly once
//! per transition.
//!
//! # Features
//!
//! - **Probing**: status endpoint first, health endpoint as fallback, with
//!   classified transport diagnostics
//! - **Reconciliation**: debounced offline detection and alarm entry/exit
//!   tracking per unit
//! - **Scheduling**: one independent poll loop per unit, kept in sync with
//!   the registry
//! - **Background sweeps**: long-interval polling of every unit at once
//! - **Control client**: setpoint, alarm reset, defrost, demo mode,
//!   configuration and logs
//! - **Registry**: a JSON-file backed list of units with stable ids
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use coldwatch_core::{
//!     DebouncePolicy, HttpTransport, LogSink, Monitor, Reconciler, UnitProber,
//!     DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
//! };
//! use coldwatch_types::UnitRecord;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(HttpTransport::new(DEFAULT_REQUEST_TIMEOUT)?);
//!     let prober = UnitProber::new(transport);
//!     let reconciler = Arc::new(Reconciler::new(DebouncePolicy::default(), Arc::new(LogSink)));
//!
//!     let mut monitor = Monitor::new(prober, reconciler, DEFAULT_POLL_INTERVAL);
//!     monitor.sync(&[UnitRecord::new(1, "Walk-in 1", "10.0.0.5", "key")]).await;
//!
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod mock;
pub mod monitor;
pub mod notify;
pub mod prober;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod sweep;
pub mod transport;
pub mod util;

// Re-export the shared data types
pub use coldwatch_types::types;

// Core exports
pub use client::{ClientError, ClientResult, DeviceClient};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, MonitorEvent, UnitEvent};
pub use mock::MockTransport;
pub use monitor::{Monitor, SyncSummary};
pub use notify::{FanoutSink, LogSink, NotificationSink, WebhookSink};
pub use prober::{
    EndpointPolicy, HEALTH_ENDPOINT, ProbeOptions, STATUS_ENDPOINT, UnitProber,
};
pub use reconcile::{DebouncePolicy, Reconciler, reconcile};
pub use registry::{FileRegistry, MemoryRegistry, NewUnit, UnitRegistry};
pub use retry::{RetryConfig, retry_result, with_retry};
pub use scheduler::{DEFAULT_POLL_INTERVAL, OutcomeHandler, SchedulerState, UnitScheduler};
pub use status::{interpret, parse_status};
pub use sweep::{DEFAULT_SWEEP_INTERVAL, SweepReport, Sweeper};
pub use transport::{DEFAULT_REQUEST_TIMEOUT, HttpTransport, Transport};

// Re-export from coldwatch-types
pub use coldwatch_types::{
    ParsedStatus, PollOutcome, Scheme, UnitIdentity, UnitPollState, UnitRecord,
};

/// Type alias for a shared notification sink.
pub type SharedSink = std::sync::Arc<dyn NotificationSink>;
