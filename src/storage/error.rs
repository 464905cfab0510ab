//! Storage error types

use thiserror::Error;

/// Storage operation errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// No row stored under the given hkey
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// A row already exists under the given hkey
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Mutation attempted with a row that has no table or no hkey
    #[error("Not a table row: {0}")]
    NotATableRow(String),

    /// Group not known to this store
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Sequence not known to this store
    #[error("Sequence not found: {0}")]
    SequenceNotFound(String),

    /// Operation not supported by this cursor or store
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    /// Transient contention; the operation may succeed if retried
    #[error("Storage busy: {0}")]
    Busy(String),

    /// Storage is closed
    #[error("Storage is closed")]
    Closed,
}

impl StorageError {
    /// True for transient stalls a caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Busy(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
