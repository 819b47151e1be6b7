//! Benchmark runner.
//!
//! The runner only ever calls [`Transport::run_cycle`]. Connecting, spawning
//! and tearing down happen outside it, so nothing but the steady-state
//! exchange is inside the measured loop. Timing itself is left to the caller:
//! a [`LatencyCollector`] here, criterion in the benches.

use crate::error::BenchError;
use crate::latency::{LatencyCollector, LatencyStats};
use pingpong_transport::{Transport, TransportKind};
use std::fmt;

/// Runs exactly `cycles` round trips.
///
/// # Returns
/// Number of successful cycles, always `cycles` on success.
///
/// # Errors
/// Aborts on the first failing cycle with [`BenchError::Cycle`].
#[inline]
pub fn run_cycles<T: Transport + ?Sized>(
    transport: &mut T,
    cycles: u64,
) -> Result<u64, BenchError> {
    for completed in 0..cycles {
        transport
            .run_cycle()
            .map_err(|e| BenchError::cycle(completed, e))?;
    }
    Ok(cycles)
}

/// Runs exactly `cycles` round trips, timing each one with `collector`.
///
/// # Errors
/// Aborts on the first failing cycle with [`BenchError::Cycle`]. Samples
/// recorded before the failure stay in the collector; callers discard them.
pub fn run_sampled<T: Transport + ?Sized>(
    transport: &mut T,
    cycles: u64,
    collector: &mut LatencyCollector,
) -> Result<u64, BenchError> {
    for completed in 0..cycles {
        collector
            .measure(|| transport.run_cycle())
            .map_err(|e| BenchError::cycle(completed, e))?;
    }
    Ok(cycles)
}

/// Result of one benchmark run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Label the run was started with.
    pub label: String,
    /// Transport variant.
    pub kind: TransportKind,
    /// Per-cycle latency over the measured cycles.
    pub stats: LatencyStats,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<14} {}", self.label, self.stats)
    }
}

/// Warm-up plus measured cycles over one transport.
#[derive(Debug, Clone, Copy)]
pub struct Runner {
    /// Measured cycles.
    pub cycles: u64,
    /// Unmeasured cycles run first.
    pub warmup: u64,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            cycles: 100_000,
            warmup: 1_000,
        }
    }
}

impl Runner {
    /// Creates a runner for `cycles` measured cycles with the default warm-up.
    #[must_use]
    pub fn new(cycles: u64) -> Self {
        Self {
            cycles,
            ..Default::default()
        }
    }

    /// Sets the warm-up cycle count.
    #[must_use]
    pub fn warmup(mut self, warmup: u64) -> Self {
        self.warmup = warmup;
        self
    }

    /// Runs warm-up, then the measured cycles.
    ///
    /// # Errors
    /// Returns the first failing cycle; no partial statistics are produced.
    pub fn run<T: Transport + ?Sized>(
        &self,
        label: impl Into<String>,
        transport: &mut T,
    ) -> Result<RunReport, BenchError> {
        if self.cycles == 0 {
            return Err(BenchError::NoCycles);
        }
        let label = label.into();
        let kind = transport.kind();

        tracing::debug!(%label, warmup = self.warmup, "warming up");
        run_cycles(transport, self.warmup)?;

        let mut collector = LatencyCollector::new();
        tracing::debug!(%label, cycles = self.cycles, "measuring");
        run_sampled(transport, self.cycles, &mut collector)?;

        let stats = collector.stats().ok_or(BenchError::NoCycles)?;
        tracing::info!(%label, %stats, "run complete");
        Ok(RunReport { label, kind, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingpong_core::{Message, PayloadError};
    use pingpong_transport::{RoundTrip, TransportError};

    /// Answers correctly until `fail_at`, then sends back the request.
    struct Scripted {
        cycles: u64,
        fail_at: Option<u64>,
    }

    impl Transport for Scripted {
        fn kind(&self) -> TransportKind {
            TransportKind::Pipe
        }

        fn run_cycle(&mut self) -> Result<RoundTrip, TransportError> {
            if self.fail_at == Some(self.cycles) {
                return Err(PayloadError::unexpected(Message::Pong, b"ping").into());
            }
            self.cycles += 1;
            Ok(RoundTrip {
                sent: Message::Ping,
                received: Message::Pong,
            })
        }
    }

    #[test]
    fn test_run_cycles_counts_exactly() {
        let mut transport = Scripted {
            cycles: 0,
            fail_at: None,
        };
        assert_eq!(run_cycles(&mut transport, 250).unwrap(), 250);
        assert_eq!(transport.cycles, 250);
    }

    #[test]
    fn test_run_cycles_aborts_on_failure() {
        let mut transport = Scripted {
            cycles: 0,
            fail_at: Some(3),
        };
        let err = run_cycles(&mut transport, 10).unwrap_err();
        match err {
            BenchError::Cycle { completed, source } => {
                assert_eq!(completed, 3);
                assert!(source.is_protocol_violation());
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
        assert_eq!(transport.cycles, 3);
    }

    #[test]
    fn test_run_sampled_records_each_cycle() {
        let mut transport = Scripted {
            cycles: 0,
            fail_at: None,
        };
        let mut collector = LatencyCollector::new();
        run_sampled(&mut transport, 40, &mut collector).unwrap();
        assert_eq!(collector.len(), 40);
    }

    #[test]
    fn test_runner_excludes_warmup_from_stats() {
        let mut transport = Scripted {
            cycles: 0,
            fail_at: None,
        };
        let report = Runner::new(100).warmup(20).run("scripted", &mut transport).unwrap();
        assert_eq!(report.stats.count, 100);
        assert_eq!(report.kind, TransportKind::Pipe);
        assert_eq!(transport.cycles, 120);
        assert!(report.to_string().starts_with("scripted"));
    }

    #[test]
    fn test_runner_failure_yields_no_report() {
        let mut transport = Scripted {
            cycles: 0,
            fail_at: Some(50),
        };
        let err = Runner::new(100)
            .warmup(10)
            .run("scripted", &mut transport)
            .unwrap_err();
        assert!(err.transport_error().unwrap().is_protocol_violation());
    }

    #[test]
    fn test_runner_requires_cycles() {
        let mut transport = Scripted {
            cycles: 0,
            fail_at: None,
        };
        let err = Runner::new(0).run("empty", &mut transport).unwrap_err();
        assert!(matches!(err, BenchError::NoCycles));
    }

    #[test]
    fn test_runner_with_boxed_transport() {
        let mut transport: Box<dyn Transport> = Box::new(Scripted {
            cycles: 0,
            fail_at: None,
        });
        let report = Runner::new(5).warmup(0).run("boxed", &mut transport).unwrap();
        assert_eq!(report.stats.count, 5);
    }
}
