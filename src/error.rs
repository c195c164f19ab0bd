//! Error taxonomy for the coordinator core.
//!
//! Every operation resolves to either a success payload or one of these
//! variants; callers can always tell "no task right now" from a failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient capacity: required {required}, available {available}")]
    InsufficientCapacity { required: i64, available: i64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ControlError {
    /// Storage failures are transient and safe to retry; the triggering
    /// transaction has been rolled back in full.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControlError::Storage(_))
    }
}

impl From<tokio_postgres::Error> for ControlError {
    fn from(err: tokio_postgres::Error) -> Self {
        ControlError::Storage(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for ControlError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        ControlError::Storage(err.to_string())
    }
}

impl From<deadpool_postgres::CreatePoolError> for ControlError {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        ControlError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
