//! Error types for sapwatch-core.
//!
//! # Error Classification
//!
//! | Error | Class | Strategy |
//! |-------|-------|----------|
//! | [`Error::Timeout`] | transient | retry with linear backoff |
//! | [`Error::Truncated`] | transient | retry, then chunk long windows |
//! | [`Error::Remote`] | permanent | surface immediately |
//! | [`Error::Transport`] | permanent | surface immediately |
//! | [`Error::Parse`] | permanent | surface immediately |
//! | [`Error::InvalidWindow`] | caller error | fix the request |
//! | [`Error::InvalidConfig`] | caller error | fix configuration and restart |
//!
//! A truncated response (the root closing element never arrived) is kept
//! apart from a parse error: the remote service is known to cut responses
//! short under load, so only the former is worth retrying.

use std::time::Duration;

use thiserror::Error;

use sapwatch_types::ChannelId;

/// Errors that can occur when fetching telemetry from the remote API.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request did not complete in time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// The configured timeout.
        duration: Duration,
    },

    /// The response ended before its root closing element.
    #[error("Truncated response for channel {channel} ({received_bytes} bytes received)")]
    Truncated {
        /// Channel being fetched.
        channel: ChannelId,
        /// Bytes received before the stream ended.
        received_bytes: usize,
    },

    /// The remote API answered with an explicit error status.
    #[error("Remote API error {status}: {message}")]
    Remote {
        /// HTTP status code returned by the remote API.
        status: u16,
        /// Error message from the response body or status line.
        message: String,
    },

    /// The request could not be sent (DNS, connection refused, TLS).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A complete response could not be parsed.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The requested window is empty or reversed.
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the failure is worth retrying.
    ///
    /// Only timeouts and truncated responses are transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Truncated { .. })
    }

    /// The remote status code, if the remote API returned one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias using sapwatch-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(
            Error::Timeout {
                operation: "fetch".to_string(),
                duration: Duration::from_secs(60),
            }
            .is_transient()
        );
        assert!(
            Error::Truncated {
                channel: 1,
                received_bytes: 12,
            }
            .is_transient()
        );
        assert!(
            !Error::Remote {
                status: 503,
                message: "busy".to_string(),
            }
            .is_transient()
        );
        assert!(!Error::Parse("bad".to_string()).is_transient());
        assert!(!Error::Transport("refused".to_string()).is_transient());
    }

    #[test]
    fn test_status() {
        let err = Error::Remote {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.status(), Some(401));
        assert_eq!(Error::Parse("x".to_string()).status(), None);
    }

    #[test]
    fn test_display() {
        let err = Error::Truncated {
            channel: 42,
            received_bytes: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("1024"));
    }
}
