//! Gateway Errors
//!
//! One error type for the store, worker and service layers. Every variant has
//! an explicit [`ErrorClass`] that the task executor uses to decide between
//! retrying a task and failing it.

use ferry_core::validation::InvalidItem;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Retry classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry later with backoff
    Transient,
    /// Retrying cannot succeed
    Permanent,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Invalid state transition or duplicate request
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic version check failed; re-read and retry
    #[error("stale state: {0}")]
    StaleState(String),

    #[error("commit lock for publish {publish_id} is held by task {holder}")]
    LockHeld { publish_id: Uuid, holder: Uuid },

    /// Throttling or timeout from an external dependency, retries exhausted
    #[error("transient write error: {0}")]
    TransientWrite(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl GatewayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::TransientWrite(_)
            | GatewayError::StaleState(_)
            | GatewayError::LockHeld { .. } => ErrorClass::Transient,
            GatewayError::Database(err) => classify_sqlx(err),
            GatewayError::NotFound(_)
            | GatewayError::Validation(_)
            | GatewayError::Conflict(_) => ErrorClass::Permanent,
        }
    }
}

impl From<InvalidItem> for GatewayError {
    fn from(err: InvalidItem) -> Self {
        GatewayError::Validation(err.0)
    }
}

/// Connection-level failures and serialization conflicts are worth retrying.
pub fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        },
        _ => ErrorClass::Permanent,
    }
}
