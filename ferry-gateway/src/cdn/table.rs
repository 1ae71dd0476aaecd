//! CDN table interface
//!
//! Batched puts and deletes keyed by (environment, web path), modeled on a
//! key-value store's batch-write call: a call may leave part of the batch
//! unprocessed (throttling) and refuse individual records (malformed data).

use async_trait::async_trait;
use ferry_core::domain::cdn::CdnEntry;
use sqlx::PgPool;

use super::CdnError;
use crate::repository::cdn_repository;

/// Maximum records accepted by one batch-write call
pub const MAX_BATCH_ITEMS: usize = 25;

/// Maximum total payload of one batch-write call
pub const MAX_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Maximum size of a single record
pub const MAX_RECORD_BYTES: usize = 400 * 1024;

/// Maximum length of a key
pub const MAX_KEY_BYTES: usize = 2048;

// Per-record framing overhead counted against payload limits
const RECORD_OVERHEAD: usize = 64;

/// One mutation of the CDN table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    Put(CdnEntry),
    Delete { web_path: String },
}

impl WriteRequest {
    pub fn web_path(&self) -> &str {
        match self {
            WriteRequest::Put(entry) => &entry.web_path,
            WriteRequest::Delete { web_path } => web_path,
        }
    }

    /// Approximate encoded size of the record
    pub fn encoded_len(&self) -> usize {
        match self {
            WriteRequest::Put(entry) => {
                entry.web_path.len()
                    + entry.object_key.len()
                    + entry.content_type.as_ref().map_or(0, String::len)
                    + RECORD_OVERHEAD
            }
            WriteRequest::Delete { web_path } => web_path.len() + RECORD_OVERHEAD,
        }
    }
}

/// Outcome of a batch-write call that reached the table
#[derive(Debug, Default)]
pub struct BatchWriteOutput {
    /// Requests the table did not get to; safe to resend
    pub unprocessed: Vec<WriteRequest>,

    /// Requests refused outright, as (web path, reason)
    pub rejected: Vec<(String, String)>,
}

#[async_trait]
pub trait CdnTable: Send + Sync {
    /// Applies up to [`MAX_BATCH_ITEMS`] requests for `env`
    ///
    /// Anything not listed in the output as unprocessed or rejected has been
    /// applied. An `Err` means nothing in the batch is known to be applied.
    async fn batch_write(
        &self,
        env: &str,
        requests: &[WriteRequest],
    ) -> Result<BatchWriteOutput, CdnError>;
}

/// CDN table stored in the gateway's own Postgres database
pub struct PgCdnTable {
    pool: PgPool,
}

impl PgCdnTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CdnTable for PgCdnTable {
    async fn batch_write(
        &self,
        env: &str,
        requests: &[WriteRequest],
    ) -> Result<BatchWriteOutput, CdnError> {
        if requests.len() > MAX_BATCH_ITEMS {
            return Err(CdnError::Rejected(format!(
                "batch of {} exceeds {} records",
                requests.len(),
                MAX_BATCH_ITEMS
            )));
        }

        // The batch is applied atomically; a failure leaves nothing written
        let mut tx = self.pool.begin().await?;
        for request in requests {
            match request {
                WriteRequest::Put(entry) => cdn_repository::upsert(&mut tx, env, entry).await?,
                WriteRequest::Delete { web_path } => {
                    cdn_repository::delete(&mut tx, env, web_path).await?
                }
            }
        }
        tx.commit().await?;

        Ok(BatchWriteOutput::default())
    }
}
