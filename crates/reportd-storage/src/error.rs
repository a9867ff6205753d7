//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Job not found, never stored, or expired past its TTL.
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Backend connection error.
    #[error("storage connection error: {message}")]
    ConnectionError { message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Filesystem error for file-backed results.
    #[error("result file I/O error: {message}")]
    IoError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    pub(crate) fn serialization(err: serde_json::Error) -> Self {
        StorageError::SerializationError {
            message: err.to_string(),
        }
    }

    pub(crate) fn io(err: std::io::Error) -> Self {
        StorageError::IoError {
            message: err.to_string(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
