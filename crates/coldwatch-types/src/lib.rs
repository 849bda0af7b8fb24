//! Shared data types for coldwatch.
//!
//! This crate holds the plain data passed between the poller, the
//! reconciliation engine and the service: unit records, per-probe outcomes,
//! parsed device status and per-unit reconciliation state.
//!
//! # Example
//!
//! ```
//! use coldwatch_types::{Scheme, UnitRecord};
//!
//! let unit = UnitRecord::new(1, "Walk-in 1", "https://10.0.0.5/", "key");
//! assert_eq!(unit.base_url(Scheme::Https).unwrap(), "https://10.0.0.5:8095");
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    DEFAULT_API_PORT, ParsedStatus, PollOutcome, Scheme, UnitIdentity, UnitPollState, UnitRecord,
    is_success_status,
};
