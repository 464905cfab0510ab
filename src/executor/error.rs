//! Executor error types

use std::time::Duration;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::storage::StorageError;

use super::lifecycle::CursorState;

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Broad class of an executor fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Bad operator arguments, raised while building the operator tree
    Validation,
    /// Domain or storage failure raised while rows flow
    Runtime,
    /// Query canceled or timed out
    Cancellation,
    /// Cursor protocol misuse; indicates a bug in an operator or driver
    Lifecycle,
}

/// Executor errors
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Storage layer error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Catalog lookup error
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Invalid operator construction arguments
    #[error("invalid operator argument: {0}")]
    Validation(String),

    /// Cursor used in a state that does not allow the operation
    #[error("cursor lifecycle violation: {operation} on {state:?} cursor")]
    Lifecycle {
        operation: &'static str,
        state: CursorState,
    },

    /// Query canceled by the session
    #[error("query canceled")]
    QueryCanceled,

    /// Query exceeded its timeout
    #[error("query timed out after {elapsed:?}")]
    QueryTimedOut { elapsed: Duration },

    /// OFFSET or LIMIT resolved to a negative value
    #[error("negative {clause}: {value}")]
    NegativeLimit { clause: &'static str, value: i64 },

    /// Binding position holds nothing in this scope or its ancestors
    #[error("no binding at position {0}")]
    BindingNotSet(usize),

    /// Binding position holds a value of the wrong kind
    #[error("binding at position {position} is not a {expected}")]
    BindingMismatch {
        position: usize,
        expected: &'static str,
    },

    /// Type mismatch during evaluation
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Invalid operation (e.g., division by zero)
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Column index out of bounds
    #[error("column index {index} out of bounds (row has {row_len} columns)")]
    ColumnIndexOutOfBounds { index: usize, row_len: usize },

    /// Arithmetic overflow
    #[error("numeric overflow in {0}")]
    Overflow(&'static str),

    /// Operation not supported by this cursor
    #[error("{0} not supported")]
    Unsupported(&'static str),

    /// Internal executor error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Classify this error
    pub fn fault_class(&self) -> FaultClass {
        match self {
            ExecutorError::Validation(_) | ExecutorError::Catalog(_) => FaultClass::Validation,
            ExecutorError::Lifecycle { .. } => FaultClass::Lifecycle,
            ExecutorError::QueryCanceled | ExecutorError::QueryTimedOut { .. } => {
                FaultClass::Cancellation
            }
            _ => FaultClass::Runtime,
        }
    }

    /// True if retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ExecutorError::Validation(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        ExecutorError::Internal(msg.into())
    }
}

/// Fail operator construction unless `cond` holds
pub(crate) fn check_argument(cond: bool, msg: impl FnOnce() -> String) -> ExecutorResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ExecutorError::Validation(msg()))
    }
}
