//! Error types for payload validation.

use crate::message::Message;
use thiserror::Error;

/// Error raised when bytes on the wire are not the payload the protocol expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Bytes that are neither `ping` nor `pong`.
    #[error("unknown payload \"{received}\"")]
    Unknown {
        /// Received bytes, ASCII-escaped.
        received: String,
    },

    /// A valid payload arrived where its complement was expected.
    #[error("unexpected payload \"{received}\", expected \"{expected}\"")]
    Unexpected {
        /// Payload the protocol required.
        expected: Message,
        /// Received bytes, ASCII-escaped.
        received: String,
    },
}

impl PayloadError {
    /// Creates an unknown payload error from raw bytes.
    pub fn unknown(received: &[u8]) -> Self {
        Self::Unknown {
            received: received.escape_ascii().to_string(),
        }
    }

    /// Creates an unexpected payload error from raw bytes.
    pub fn unexpected(expected: Message, received: &[u8]) -> Self {
        Self::Unexpected {
            expected,
            received: received.escape_ascii().to_string(),
        }
    }
}
