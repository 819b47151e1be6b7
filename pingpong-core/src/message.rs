//! The ping/pong message protocol.
//!
//! Every transport exchanges exactly one of two 4-byte ASCII payloads. Stream
//! transports that read line frames (the pipe transport) append a newline,
//! giving a 5-byte frame. There is no length prefix and no versioning.

use crate::error::PayloadError;
use std::fmt;

/// Size of a payload in bytes.
pub const PAYLOAD_LEN: usize = 4;

/// Size of a line frame (payload plus trailing newline) in bytes.
pub const LINE_LEN: usize = PAYLOAD_LEN + 1;

/// A raw payload.
pub type Payload = [u8; PAYLOAD_LEN];

/// A raw line frame.
pub type Line = [u8; LINE_LEN];

/// Reply sent by a tolerant line responder for any frame it does not recognise.
pub const ERROR_LINE: &Line = b"Error";

/// One of the two valid protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {
    /// `ping`
    Ping,
    /// `pong`
    Pong,
}

impl Message {
    /// Returns the 4-byte payload for this message.
    #[must_use]
    pub const fn payload(self) -> &'static Payload {
        match self {
            Self::Ping => b"ping",
            Self::Pong => b"pong",
        }
    }

    /// Returns the 5-byte line frame for this message.
    #[must_use]
    pub const fn line(self) -> &'static Line {
        match self {
            Self::Ping => b"ping\n",
            Self::Pong => b"pong\n",
        }
    }

    /// Returns the complementary message.
    #[must_use]
    pub const fn reply(self) -> Self {
        match self {
            Self::Ping => Self::Pong,
            Self::Pong => Self::Ping,
        }
    }

    /// Parses a payload.
    ///
    /// # Errors
    /// Returns [`PayloadError::Unknown`] if `bytes` is not exactly `ping` or `pong`.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, PayloadError> {
        match bytes {
            b"ping" => Ok(Self::Ping),
            b"pong" => Ok(Self::Pong),
            other => Err(PayloadError::unknown(other)),
        }
    }

    /// Parses a line frame.
    ///
    /// # Errors
    /// Returns [`PayloadError::Unknown`] if `bytes` is not exactly `ping\n` or `pong\n`.
    pub fn from_line(bytes: &[u8]) -> Result<Self, PayloadError> {
        match bytes {
            b"ping\n" => Ok(Self::Ping),
            b"pong\n" => Ok(Self::Pong),
            other => Err(PayloadError::unknown(other)),
        }
    }

    /// Checks that `received` is the payload answering this message.
    ///
    /// # Errors
    /// Returns [`PayloadError::Unexpected`] for any other byte pattern.
    pub fn check_reply(self, received: &[u8]) -> Result<Self, PayloadError> {
        let expected = self.reply();
        if received == expected.payload() {
            Ok(expected)
        } else {
            Err(PayloadError::unexpected(expected, received))
        }
    }

    /// Checks that `received` is the line frame answering this message.
    ///
    /// # Errors
    /// Returns [`PayloadError::Unexpected`] for any other byte pattern.
    pub fn check_reply_line(self, received: &[u8]) -> Result<Self, PayloadError> {
        let expected = self.reply();
        if received == expected.line() {
            Ok(expected)
        } else {
            Err(PayloadError::unexpected(expected, received))
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads are ASCII by construction.
        f.write_str(match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
        })
    }
}

/// Answers a line frame the tolerant way.
///
/// `ping\n` gets `pong\n`, `pong\n` gets `ping\n`, and anything else gets the
/// literal [`ERROR_LINE`] instead of a failure.
#[must_use]
pub fn reply_line(frame: &[u8]) -> &'static Line {
    match Message::from_line(frame) {
        Ok(message) => message.reply().line(),
        Err(_) => ERROR_LINE,
    }
}
