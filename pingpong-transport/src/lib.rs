//! # Pingpong Transport
//!
//! Round-trip transports for the pingpong latency harness.
//!
//! This crate provides:
//! - [`pipe`] - stdin/stdout byte streams of a spawned consumer
//! - [`tcp`] - a single loopback TCP connection
//! - [`udp`] - a pair of connected loopback UDP sockets
//! - [`shm`] - an 8-byte shared-memory segment with a polled handoff lock
//! - [`process`] - spawning the consumer process and waiting for readiness
//! - [`transport`] - the uniform `connect`/`run_cycle` contract over all four

pub mod error;
pub mod framing;
pub mod pipe;
pub mod process;
pub mod shm;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use error::TransportError;
pub use process::{ConsumerArgs, ConsumerCommand, ConsumerProcess, Readiness};
pub use transport::{RoundTrip, Transport, TransportConfig, TransportHandle, TransportKind};
