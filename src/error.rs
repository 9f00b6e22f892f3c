//! Sorting errors.

use std::io;

use thiserror::Error;

/// Sorting error.
#[derive(Debug, Error)]
pub enum SortError {
    /// Record does not follow the `<number>. <phrase>` layout or its phrase is too long.
    #[error("entry format error: {0}")]
    Format(String),
    /// A line or a chunk budget does not fit the configured capacity.
    #[error("capacity exceeded: {0}")]
    Capacity(String),
    /// Method invoked before its required setup step.
    #[error("invalid state: {0}")]
    State(&'static str),
    /// Mutation attempted on a read-only view.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    /// Spill file creation error.
    #[error("temporary file not created: {0}")]
    TempFile(io::Error),
    /// Workers thread pool initialization error.
    #[error("thread pool initialization failed: {0}")]
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    #[error("I/O operation failed: {0}")]
    Io(#[from] io::Error),
    /// Operation stopped by a cancellation request.
    #[error("operation cancelled")]
    Cancelled,
}

impl SortError {
    /// Checks if the error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SortError::Cancelled)
    }
}
