//! Error types for coldwatch-core.
//!
//! Polling never returns these: every transport, HTTP and parse failure
//! during a poll is folded into a [`PollOutcome`](coldwatch_types::PollOutcome)
//! and only becomes visible through the debounce policy. The errors here
//! cover the surfaces around the poller: the unit registry, HTTP client
//! construction and notification delivery.
//!
//! ## Recovery
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::RegistryRead`] / [`Error::RegistryWrite`] | Check file permissions and retry |
//! | [`Error::RegistryFormat`] | Fix or restore the registry file |
//! | [`Error::UnitNotFound`] | Refresh the unit list |
//! | [`Error::InvalidUnit`] | Correct the unit's address or port |
//! | [`Error::Notification`] | Logged by the reconciler; delivery is best effort |

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur outside the poll path.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Reading the registry file failed.
    #[error("Failed to read unit registry {path}: {source}")]
    RegistryRead {
        /// Registry file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Writing the registry file failed.
    #[error("Failed to write unit registry {path}: {source}")]
    RegistryWrite {
        /// Registry file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The registry file is not valid JSON.
    #[error("Unit registry {path} is malformed: {source}")]
    RegistryFormat {
        /// Registry file path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// No unit matches the given identifier.
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// A unit record failed validation.
    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    /// The unit address could not be turned into a URL.
    #[error(transparent)]
    Address(#[from] coldwatch_types::ParseError),

    /// Building the HTTP client failed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// A notification sink could not deliver a message.
    #[error("Notification delivery failed: {0}")]
    Notification(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a unit-not-found error.
    pub fn unit_not_found(identifier: impl Into<String>) -> Self {
        Self::UnitNotFound(identifier.into())
    }

    /// Create an invalid-unit error.
    pub fn invalid_unit(message: impl Into<String>) -> Self {
        Self::InvalidUnit(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using coldwatch-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
