//! Error types for data parsing in coldwatch-types.

use thiserror::Error;

/// Errors that can occur when interpreting unit records and settings.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The unit address is empty or unusable.
    #[error("Invalid unit address: {0}")]
    InvalidAddress(String),

    /// An unknown URL scheme was requested.
    #[error("Unknown scheme '{0}' (expected 'http' or 'https')")]
    UnknownScheme(String),

    /// A value could not be interpreted.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using coldwatch-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
