//! # Pingpong Bench
//!
//! Drives round-trip cycles over a connected transport and collects latency.
//!
//! Binaries:
//! - `pingpong` - spawns a consumer per transport and prints a latency table
//! - `pingpong-consumer` - the consumer end, one subcommand per transport

pub mod error;
pub mod latency;
pub mod runner;

pub use error::BenchError;
pub use latency::{LatencyCollector, LatencyStats};
pub use runner::{RunReport, Runner, run_cycles, run_sampled};
