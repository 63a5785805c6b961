//! Error types for parsing sapwatch values from strings.

use thiserror::Error;

/// Errors that can occur when parsing sapwatch values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// Unknown aggregation mode name.
    #[error("Unknown aggregation mode: {0}")]
    UnknownAggregation(String),

    /// Unknown channel kind name.
    #[error("Unknown channel kind: {0}")]
    UnknownChannelKind(String),
}

/// Result type alias using sapwatch-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
