//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while persisting job results.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Result not found: {0}")]
    NotFound(PathBuf),

    #[error("Result header has not been written")]
    HeaderMissing,

    #[error("Result header already written")]
    HeaderExists,

    #[error("Frame {got} appended out of order, expected {expected}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("Invalid job id for a result directory: {0:?}")]
    InvalidJobId(String),

    #[error("Result handle is sealed")]
    Sealed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn out_of_order(expected: u64, got: u64) -> Self {
        Self::OutOfOrder { expected, got }
    }
}
