//! Latency measurement utilities.

use hdrhistogram::Histogram;
use std::fmt;
use std::time::{Duration, Instant};

/// Highest latency the histogram tracks exactly. Longer samples saturate.
const MAX_TRACKABLE_NANOS: u64 = 60_000_000_000;

/// Significant figures kept by the histogram.
const SIGNIFICANT_FIGURES: u8 = 3;

/// Latency statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    /// Minimum latency.
    pub min: Duration,
    /// Maximum latency.
    pub max: Duration,
    /// Mean latency.
    pub mean: Duration,
    /// Median latency (p50).
    pub median: Duration,
    /// 99th percentile latency.
    pub p99: Duration,
    /// 99.9th percentile latency.
    pub p999: Duration,
    /// Sum of all samples.
    pub total: Duration,
    /// Sample count.
    pub count: u64,
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} mean={:?} p50={:?} p99={:?} p99.9={:?} min={:?} max={:?}",
            self.count, self.mean, self.median, self.p99, self.p999, self.min, self.max
        )
    }
}

/// Collects per-cycle latency samples into an HDR histogram.
pub struct LatencyCollector {
    histogram: Histogram<u64>,
    total: Duration,
}

impl LatencyCollector {
    /// Creates a new latency collector.
    #[must_use]
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, MAX_TRACKABLE_NANOS, SIGNIFICANT_FIGURES)
                .expect("histogram bounds are valid constants");
        Self {
            histogram,
            total: Duration::ZERO,
        }
    }

    /// Records a latency sample.
    pub fn record(&mut self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(nanos.max(1));
        self.total += latency;
    }

    /// Measures the latency of a function.
    pub fn measure<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = f();
        self.record(start.elapsed());
        result
    }

    /// Computes statistics from collected samples.
    #[must_use]
    pub fn stats(&self) -> Option<LatencyStats> {
        let count = self.histogram.len();
        if count == 0 {
            return None;
        }

        let nanos = Duration::from_nanos;
        Some(LatencyStats {
            min: nanos(self.histogram.min()),
            max: nanos(self.histogram.max()),
            mean: nanos(self.histogram.mean().round() as u64),
            median: nanos(self.histogram.value_at_quantile(0.5)),
            p99: nanos(self.histogram.value_at_quantile(0.99)),
            p999: nanos(self.histogram.value_at_quantile(0.999)),
            total: self.total,
            count,
        })
    }

    /// Clears all samples.
    pub fn clear(&mut self) {
        self.histogram.reset();
        self.total = Duration::ZERO;
    }

    /// Returns the number of samples.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    /// Returns true if no samples have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }
}

impl Default for LatencyCollector {
    fn default() -> Self {
        Self::new()
    }
}
