//! Commit orchestrator
//!
//! Drives one claimed task through the publish state machine:
//!
//! ```text
//! PENDING/FAILED -> COMMITTING -> COMPLETE
//!                             \-> FAILED
//! ```
//!
//! The task holds the publish's commit lease for the whole COMMITTING phase.
//! The frozen snapshot is cut into path-ordered chunks; after each chunk the
//! written paths are recorded so a resumed task only writes what is left.
//! Cancellation is checked between chunks, never inside one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use ferry_core::domain::item::Item;
use ferry_core::domain::publish::{Publish, PublishStatus};
use ferry_core::domain::task::Task;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::invalidator::{InvalidationResult, Invalidator};
use super::writer::TableWriter;
use crate::error::{GatewayError, Result};
use crate::store::{PublishStore, TaskLedger};

const CANCELLED_REASON: &str = "cancelled by request";

#[derive(Debug, Clone)]
pub struct CommitConfig {
    pub chunk_size: usize,
    pub chunk_concurrency: usize,
    pub lock_ttl: Duration,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            chunk_concurrency: 1,
            lock_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Chunks written by this attempt
    pub chunks_written: usize,
    pub paths_written: usize,
    pub invalidation: InvalidationResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Completed(CommitSummary),
    /// The publish and task were failed with this reason
    Failed(String),
}

enum ChunkOutcome {
    Written {
        paths: usize,
        rejected: Vec<(String, String)>,
    },
    Skipped,
    Cancelled,
}

pub struct CommitOrchestrator {
    publishes: Arc<dyn PublishStore>,
    ledger: Arc<dyn TaskLedger>,
    writer: TableWriter,
    invalidator: Invalidator,
    config: CommitConfig,
}

impl CommitOrchestrator {
    pub fn new(
        publishes: Arc<dyn PublishStore>,
        ledger: Arc<dyn TaskLedger>,
        writer: TableWriter,
        invalidator: Invalidator,
        config: CommitConfig,
    ) -> Self {
        Self {
            publishes,
            ledger,
            writer,
            invalidator,
            config,
        }
    }

    /// Runs a claimed task to a terminal outcome
    ///
    /// `Err` means the attempt stopped early and left the task IN_PROGRESS;
    /// the caller decides from the error class whether to retry or abandon.
    pub async fn run(&self, task: &Task) -> Result<CommitOutcome> {
        if task.deadline_exceeded(Utc::now()) {
            let reason = "deadline exceeded".to_string();
            self.abandon(task, &reason).await?;
            return Ok(CommitOutcome::Failed(reason));
        }
        if self.ledger.is_cancel_requested(task.id).await? {
            self.abandon(task, CANCELLED_REASON).await?;
            return Ok(CommitOutcome::Failed(CANCELLED_REASON.to_string()));
        }

        self.publishes
            .acquire_commit_lock(task.publish_id, task.id, self.config.lock_ttl)
            .await?;

        let result = self.commit_locked(task).await;

        if let Err(e) = self
            .publishes
            .release_commit_lock(task.publish_id, task.id)
            .await
        {
            warn!(
                "Failed to release commit lock of publish {}: {}",
                task.publish_id, e
            );
        }

        result
    }

    /// Fails the task, and its publish if this task had moved it to COMMITTING
    pub async fn abandon(&self, task: &Task, reason: &str) -> Result<()> {
        if let Some(publish) = self.publishes.get_publish(task.publish_id).await? {
            if publish.status == PublishStatus::Committing {
                self.publishes
                    .transition(publish.id, publish.version, PublishStatus::Failed, Some(reason))
                    .await?;
            }
        }

        self.ledger.fail(task.id, reason).await?;
        warn!("Task {} failed: {}", task.id, reason);
        Ok(())
    }

    async fn commit_locked(&self, task: &Task) -> Result<CommitOutcome> {
        let publish = self
            .publishes
            .get_publish(task.publish_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("publish {}", task.publish_id)))?;

        let publish = match publish.status {
            PublishStatus::Pending | PublishStatus::Failed => {
                self.publishes
                    .transition(publish.id, publish.version, PublishStatus::Committing, None)
                    .await?
            }
            PublishStatus::Committing => {
                info!("Task {} resuming commit of publish {}", task.id, publish.id);
                publish
            }
            PublishStatus::Complete => {
                info!("Publish {} already complete, closing task {}", publish.id, task.id);
                self.ledger.complete(task.id).await?;
                return Ok(CommitOutcome::Completed(CommitSummary::default()));
            }
        };

        let items = resolve_links(self.publishes.freeze_snapshot(publish.id).await?);
        let done = self.ledger.load_progress(task.id).await?;

        let chunks: Vec<Vec<Item>> = items
            .chunks(self.config.chunk_size.max(1))
            .map(|chunk| {
                chunk
                    .iter()
                    .filter(|item| !done.contains(&item.web_path))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|chunk| !chunk.is_empty())
            .collect();

        info!(
            "Committing publish {} to {}: {} item(s), {} chunk(s) to write",
            publish.id,
            publish.env,
            items.len(),
            chunks.len()
        );

        let halted = AtomicBool::new(false);
        let halted = &halted;
        let env = publish.env.as_str();
        let requests: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| async move {
                let outcome = self.process_chunk(task, env, index, chunk, halted).await;
                if outcome.is_err() {
                    halted.store(true, Ordering::SeqCst);
                }
                outcome
            })
            .collect();
        let outcomes: Vec<Result<ChunkOutcome>> = stream::iter(requests)
            .buffer_unordered(self.config.chunk_concurrency.max(1))
            .collect()
            .await;

        let mut summary = CommitSummary::default();
        let mut rejected = Vec::new();
        let mut cancelled = false;
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(ChunkOutcome::Written {
                    paths,
                    rejected: chunk_rejected,
                }) => {
                    summary.chunks_written += 1;
                    summary.paths_written += paths;
                    rejected.extend(chunk_rejected);
                }
                Ok(ChunkOutcome::Skipped) => {}
                Ok(ChunkOutcome::Cancelled) => cancelled = true,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            warn!(
                "Commit of publish {} interrupted after {} chunk(s): {}",
                publish.id, summary.chunks_written, e
            );
            return Err(e);
        }

        if !rejected.is_empty() {
            rejected.sort();
            let (path, reason) = &rejected[0];
            let detail = format!(
                "{} item(s) rejected; first: {}: {}",
                rejected.len(),
                path,
                reason
            );
            self.fail_commit(task, &publish, &detail).await?;
            return Ok(CommitOutcome::Failed(detail));
        }

        if cancelled {
            self.fail_commit(task, &publish, CANCELLED_REASON).await?;
            return Ok(CommitOutcome::Failed(CANCELLED_REASON.to_string()));
        }

        let paths: Vec<String> = items.into_iter().map(|item| item.web_path).collect();
        summary.invalidation = self.invalidator.invalidate(&publish.env, &paths).await;
        if !summary.invalidation.is_success() {
            warn!(
                "Cache invalidation for publish {} incomplete: {}",
                publish.id,
                summary.invalidation.failures.join("; ")
            );
        }

        self.publishes
            .transition(publish.id, publish.version, PublishStatus::Complete, None)
            .await?;
        self.ledger.complete(task.id).await?;

        info!(
            "Publish {} committed: {} chunk(s), {} path(s) written",
            publish.id, summary.chunks_written, summary.paths_written
        );
        Ok(CommitOutcome::Completed(summary))
    }

    async fn process_chunk(
        &self,
        task: &Task,
        env: &str,
        index: usize,
        chunk: Vec<Item>,
        halted: &AtomicBool,
    ) -> Result<ChunkOutcome> {
        if halted.load(Ordering::SeqCst) {
            return Ok(ChunkOutcome::Skipped);
        }
        if self.ledger.is_cancel_requested(task.id).await? {
            info!("Task {} cancelled before chunk {}", task.id, index);
            halted.store(true, Ordering::SeqCst);
            return Ok(ChunkOutcome::Cancelled);
        }

        let result = self.writer.write_chunk(env, &chunk).await?;

        if !result.written.is_empty() {
            self.ledger.record_progress(task.id, &result.written).await?;
        }
        self.ledger.heartbeat(task.id).await?;
        self.publishes
            .renew_commit_lock(task.publish_id, task.id, self.config.lock_ttl)
            .await?;

        debug!(
            "Task {} chunk {}: {} written, {} rejected",
            task.id,
            index,
            result.written.len(),
            result.rejected.len()
        );

        Ok(ChunkOutcome::Written {
            paths: result.written.len(),
            rejected: result.rejected,
        })
    }

    async fn fail_commit(&self, task: &Task, publish: &Publish, reason: &str) -> Result<()> {
        self.publishes
            .transition(publish.id, publish.version, PublishStatus::Failed, Some(reason))
            .await?;
        self.ledger.fail(task.id, reason).await?;
        warn!("Commit of publish {} failed: {}", publish.id, reason);
        Ok(())
    }
}

/// Points each link at its target's object within the same snapshot
///
/// Links whose target is missing, absent or itself a link stay unresolved
/// and are rejected by the writer.
fn resolve_links(items: Vec<Item>) -> Vec<Item> {
    let targets: HashMap<String, (String, Option<String>)> = items
        .iter()
        .filter(|item| !item.is_link() && !item.is_absent())
        .filter_map(|item| {
            item.object_key
                .clone()
                .map(|key| (item.web_path.clone(), (key, item.content_type.clone())))
        })
        .collect();

    items
        .into_iter()
        .map(|mut item| {
            if let Some(target) = &item.link_to {
                if let Some((key, content_type)) = targets.get(target) {
                    item.object_key = Some(key.clone());
                    item.content_type = content_type.clone();
                }
            }
            item
        })
        .collect()
}
