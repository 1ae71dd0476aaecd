//! CDN capability interfaces
//!
//! The commit pipeline reaches the two external CDN services only through
//! these traits:
//! - [`CdnTable`]: the key-value table the delivery tier reads
//! - [`PurgeApi`]: the cache purge endpoint
//!
//! Adapters report failures as [`CdnError`], which carries its own retry
//! classification so callers never inspect error text.

pub mod purge;
pub mod table;

#[cfg(test)]
pub mod testing;

use crate::error::{ErrorClass, classify_sqlx};

pub use purge::{HttpPurgeClient, PurgeApi};
pub use table::{BatchWriteOutput, CdnTable, PgCdnTable, WriteRequest};

/// A classified failure from an external CDN service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CdnError {
    /// The service asked us to slow down
    #[error("throttled: {0}")]
    Throttled(String),

    /// Timeout, connection failure or server-side error
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request itself was refused; resending it cannot succeed
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CdnError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CdnError::Throttled(_) | CdnError::Unavailable(_) => ErrorClass::Transient,
            CdnError::Rejected(_) => ErrorClass::Permanent,
        }
    }
}

impl From<sqlx::Error> for CdnError {
    fn from(err: sqlx::Error) -> Self {
        match classify_sqlx(&err) {
            ErrorClass::Transient => CdnError::Unavailable(err.to_string()),
            ErrorClass::Permanent => CdnError::Rejected(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for CdnError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            CdnError::Unavailable(err.to_string())
        } else {
            CdnError::Rejected(err.to_string())
        }
    }
}
