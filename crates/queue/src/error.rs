//! Queue and invocation error types.

use thiserror::Error;

use drainbatch_core::ConfigError;

/// Errors raised by a queue backend call.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("provider error: {0}")]
    Provider(String),
}

/// Fatal errors for one consumer invocation.
///
/// None of these are retried in place. Whatever was fetched but not deleted
/// reappears once its visibility timeout runs out and is picked up by the
/// next scheduled invocation.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("queue depth unavailable: {0}")]
    DepthUnavailable(String),

    #[error("fetch failed after {fetched} message(s) drained: {source}")]
    Fetch {
        fetched: usize,
        #[source]
        source: QueueError,
    },

    #[error("batch processing failed for {batch_size} message(s): {source:#}")]
    Processing {
        batch_size: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl BatchError {
    /// Short stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchError::Configuration(_) => "configuration",
            BatchError::DepthUnavailable(_) => "depth_unavailable",
            BatchError::Fetch { .. } => "fetch",
            BatchError::Processing { .. } => "processing",
        }
    }
}
