//! Error types for transport operations.

use pingpong_core::PayloadError;
use std::time::Duration;
use thiserror::Error;

/// Error type for transport operations.
///
/// Every variant is fatal for the run it occurs in. Nothing is retried.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error on an established channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure to bind, listen, connect, accept or spawn the consumer.
    #[error("connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Peer closed the channel in the middle of a cycle.
    #[error("connection closed")]
    ConnectionClosed,

    /// Received payload is not the expected complement.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] PayloadError),

    /// A bounded wait elapsed without the peer answering.
    #[error("timed out after {waited:?}")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// Shared segment creation or mapping failure.
    #[error("resource error: {message}")]
    Resource {
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a resource error.
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(waited: Duration) -> Self {
        Self::Timeout { waited }
    }

    /// Maps an IO error raised while a blocking read waits for a reply.
    ///
    /// Read timeouts become [`TransportError::Timeout`] and end-of-stream becomes
    /// [`TransportError::ConnectionClosed`].
    pub(crate) fn from_recv(err: std::io::Error, waited: Option<Duration>) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                Self::timeout(waited.unwrap_or_default())
            }
            ErrorKind::UnexpectedEof => Self::ConnectionClosed,
            ErrorKind::ConnectionRefused => {
                Self::connection(format!("peer unreachable: {err}"))
            }
            _ => Self::Io(err),
        }
    }

    /// Returns true if this error is a protocol violation.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
