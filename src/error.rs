use thiserror::Error;

use crate::config::ConfigError;
use crate::histogram::HistogramError;
use crate::transport::TransportError;

/// Anything that invalidates a benchmark run.
///
/// Backpressure never shows up here; it is retried where it is detected.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("histogram setup failed: {0}")]
    Histogram(#[from] HistogramError),

    #[error("receiver thread for {phase} phase panicked")]
    ReceiverPanicked { phase: &'static str },

    #[error("receiver aborted after observing {observed} of {expected} fragments")]
    Aborted { observed: u64, expected: u64 },

    #[error("failed to spawn receiver thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
