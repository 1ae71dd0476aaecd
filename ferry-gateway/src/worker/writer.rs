//! CDN table writer
//!
//! Turns a chunk of items into batch-write calls against the CDN table,
//! respecting the table's per-call record and payload limits. Throttled or
//! unprocessed records are resent with backoff; records the table refuses are
//! reported back inline and never resent.

use std::collections::HashSet;
use std::sync::Arc;

use ferry_core::domain::cdn::CdnEntry;
use ferry_core::domain::item::Item;
use tracing::{debug, warn};

use super::backoff::Backoff;
use crate::cdn::table::{MAX_BATCH_BYTES, MAX_BATCH_ITEMS, MAX_KEY_BYTES, MAX_RECORD_BYTES};
use crate::cdn::{CdnTable, WriteRequest};
use crate::error::{ErrorClass, GatewayError, Result};

/// Outcome of writing one chunk
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub written: Vec<String>,

    /// Permanent write errors as `(path, reason)`; never resent
    pub rejected: Vec<(String, String)>,
}

pub struct TableWriter {
    table: Arc<dyn CdnTable>,
    max_attempts: u32,
    backoff: Backoff,
}

impl TableWriter {
    pub fn new(table: Arc<dyn CdnTable>, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            table,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Writes the final CDN mapping of every item in `items`
    ///
    /// Items must already have their links resolved. Writing the same chunk
    /// again leaves the table unchanged. Fails with `TransientWrite` once a
    /// batch has used up its attempts.
    pub async fn write_chunk(&self, env: &str, items: &[Item]) -> Result<WriteResult> {
        let mut result = WriteResult::default();

        let mut requests = Vec::with_capacity(items.len());
        for item in items {
            match to_request(item) {
                Ok(request) => requests.push(request),
                Err(reason) => result.rejected.push((item.web_path.clone(), reason)),
            }
        }

        for batch in split_batches(requests, MAX_BATCH_ITEMS, MAX_BATCH_BYTES) {
            self.write_batch(env, batch, &mut result).await?;
        }

        debug!(
            "Wrote {} path(s) to {} ({} rejected)",
            result.written.len(),
            env,
            result.rejected.len()
        );
        Ok(result)
    }

    async fn write_batch(
        &self,
        env: &str,
        batch: Vec<WriteRequest>,
        result: &mut WriteResult,
    ) -> Result<()> {
        let mut pending = batch;
        let mut attempt = 0;

        while !pending.is_empty() {
            attempt += 1;

            let reason = match self.table.batch_write(env, &pending).await {
                Ok(output) => {
                    let skipped: HashSet<String> = output
                        .unprocessed
                        .iter()
                        .map(|r| r.web_path().to_string())
                        .chain(output.rejected.iter().map(|(path, _)| path.clone()))
                        .collect();

                    result.written.extend(
                        pending
                            .iter()
                            .map(WriteRequest::web_path)
                            .filter(|path| !skipped.contains(*path))
                            .map(str::to_string),
                    );
                    result.rejected.extend(output.rejected);

                    pending = output.unprocessed;
                    if pending.is_empty() {
                        break;
                    }
                    format!("{} record(s) unprocessed", pending.len())
                }
                Err(err) if err.class() == ErrorClass::Transient => err.to_string(),
                Err(err) => {
                    warn!("CDN table refused batch of {}: {}", pending.len(), err);
                    let reason = err.to_string();
                    result.rejected.extend(
                        pending
                            .drain(..)
                            .map(|r| (r.web_path().to_string(), reason.clone())),
                    );
                    break;
                }
            };

            if attempt >= self.max_attempts {
                return Err(GatewayError::TransientWrite(format!(
                    "gave up on {} record(s) after {} attempt(s): {}",
                    pending.len(),
                    attempt,
                    reason
                )));
            }

            let delay = self.backoff.delay(attempt);
            warn!(
                "CDN table write attempt {}/{} incomplete ({}), retrying in {:?}",
                attempt, self.max_attempts, reason, delay
            );
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }
}

/// The table mutation for one item, or the reason it cannot be written
fn to_request(item: &Item) -> std::result::Result<WriteRequest, String> {
    if item.web_path.len() > MAX_KEY_BYTES {
        return Err(format!("web path exceeds {} bytes", MAX_KEY_BYTES));
    }

    if item.is_absent() {
        return Ok(WriteRequest::Delete {
            web_path: item.web_path.clone(),
        });
    }

    let Some(object_key) = &item.object_key else {
        return Err(match &item.link_to {
            Some(target) => format!("link target {} not found in publish", target),
            None => "item has no object key".to_string(),
        });
    };

    let request = WriteRequest::Put(CdnEntry {
        web_path: item.web_path.clone(),
        object_key: object_key.clone(),
        content_type: item.content_type.clone(),
        publish_id: item.publish_id,
    });
    if request.encoded_len() > MAX_RECORD_BYTES {
        return Err(format!("record exceeds {} bytes", MAX_RECORD_BYTES));
    }
    Ok(request)
}

/// Groups requests into batches within the table's record and payload limits
fn split_batches(
    requests: Vec<WriteRequest>,
    max_items: usize,
    max_bytes: usize,
) -> Vec<Vec<WriteRequest>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0;

    for request in requests {
        let len = request.encoded_len();
        if !current.is_empty() && (current.len() >= max_items || current_bytes + len > max_bytes) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += len;
        current.push(request);
    }
    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
