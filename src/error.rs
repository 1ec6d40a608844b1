//! Error types for the ingestion pipeline

use thiserror::Error;

/// Failure reported by a storage adapter
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage not connected")]
    NotConnected,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to callers of the tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A required event field is missing; nothing was admitted
    #[error("validation error: {0}")]
    Validation(String),

    /// The batch queue is full; the caller must back off
    #[error("queue capacity exceeded ({max_queue_size} items)")]
    CapacityExceeded { max_queue_size: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TrackerError {
    pub fn validation(message: impl Into<String>) -> Self {
        TrackerError::Validation(message.into())
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Result type for storage adapter operations
pub type StorageResult<T> = Result<T, StorageError>;
