//! Error types for benchmark runs.

use pingpong_transport::TransportError;
use thiserror::Error;

/// Error type for benchmark runs.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The transport could not be set up. Nothing was timed.
    #[error("setup failed: {0}")]
    Setup(#[from] TransportError),

    /// A cycle failed. The run was aborted and no statistics were produced.
    #[error("cycle failed after {completed} successful cycles: {source}")]
    Cycle {
        /// Cycles that completed before the failure.
        completed: u64,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// A run was asked to measure zero cycles.
    #[error("no measured cycles requested")]
    NoCycles,
}

impl BenchError {
    /// Creates a cycle error.
    pub fn cycle(completed: u64, source: TransportError) -> Self {
        Self::Cycle { completed, source }
    }

    /// Returns the transport error behind this failure, if any.
    #[must_use]
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Setup(e) | Self::Cycle { source: e, .. } => Some(e),
            Self::NoCycles => None,
        }
    }
}
