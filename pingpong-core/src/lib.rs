//! # Pingpong Core
//!
//! The fixed message protocol shared by every pingpong transport.
//!
//! This crate provides:
//! - [`Message`] - the two valid payloads, `ping` and `pong`
//! - Fixed-size payload and line frames (4 and 5 bytes)
//! - [`PayloadError`] for anything that is not one of the two payloads

pub mod error;
pub mod message;

pub use error::PayloadError;
pub use message::{ERROR_LINE, LINE_LEN, Line, Message, PAYLOAD_LEN, Payload, reply_line};
