//! Error types for the query surface.

use thiserror::Error;

/// Errors a query call can report before or during execution. Per-point
/// misses are not errors; they come back as sentinel rows in the output.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("submap set is empty")]
    EmptySubmapSet,

    #[error("submap index {index} out of range for set of {len}")]
    SubmapIndexOutOfRange { index: usize, len: usize },

    #[error("gpu execution failed: {0}")]
    Gpu(anyhow::Error),
}
