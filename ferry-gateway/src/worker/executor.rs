//! Task executor
//!
//! Polls the task ledger for ready commit tasks and runs each in its own
//! tokio task, bounded by the worker count. Transient failures put the task
//! back in the queue with a growing delay until its attempts run out;
//! permanent failures fail it at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backoff::Backoff;
use super::commit::{CommitOrchestrator, CommitOutcome};
use crate::error::{ErrorClass, Result};
use crate::store::TaskLedger;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Tasks executed concurrently
    pub workers: usize,

    pub poll_interval: Duration,

    /// Attempts before a transiently failing task is failed for good
    pub max_attempts: u32,

    /// Delay before a requeued task becomes ready again
    pub retry_backoff: Backoff,

    /// In-progress tasks silent for this long are assumed orphaned
    pub stale_after: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(5),
            max_attempts: 5,
            retry_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(300)),
            stale_after: Duration::from_secs(300),
        }
    }
}

pub struct TaskExecutor {
    ledger: Arc<dyn TaskLedger>,
    orchestrator: Arc<CommitOrchestrator>,
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
}

impl TaskExecutor {
    pub fn new(
        ledger: Arc<dyn TaskLedger>,
        orchestrator: Arc<CommitOrchestrator>,
        config: ExecutorConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            ledger,
            orchestrator,
            config,
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) {
        info!(
            "Starting task executor ({} worker(s), interval: {:?})",
            self.config.workers, self.config.poll_interval
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for ready tasks");

            match self.poll_once().await {
                Ok(executed) => {
                    if executed > 0 {
                        info!("Executed {} task(s) this cycle", executed);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {}", e);
                }
            }
        }
    }

    /// Performs a single poll cycle, returning how many tasks were started
    pub async fn poll_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - to_chrono(self.config.stale_after);
        let recovered = self.ledger.requeue_stale(cutoff).await?;
        if recovered > 0 {
            warn!("Requeued {} task(s) with a lost worker", recovered);
        }

        let tasks = self
            .ledger
            .list_ready(Utc::now(), self.config.workers.max(1))
            .await?;

        if tasks.is_empty() {
            debug!("No tasks ready");
            return Ok(0);
        }

        let mut handles = Vec::new();

        for task in tasks {
            // Try to acquire semaphore permit, skip if at max capacity
            if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                handles.push(self.spawn_task(task.id, permit));
            } else {
                debug!("All workers busy, leaving task {} for later", task.id);
            }
        }

        let started = handles.len();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task worker panicked: {}", e);
            }
        }

        Ok(started)
    }

    fn spawn_task(&self, task_id: Uuid, permit: OwnedSemaphorePermit) -> tokio::task::JoinHandle<()> {
        let ledger = Arc::clone(&self.ledger);
        let orchestrator = Arc::clone(&self.orchestrator);
        let config = self.config.clone();

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = Self::execute_task(task_id, ledger, orchestrator, config).await {
                error!("Failed to execute task {}: {}", task_id, e);
            }
        })
    }

    async fn execute_task(
        task_id: Uuid,
        ledger: Arc<dyn TaskLedger>,
        orchestrator: Arc<CommitOrchestrator>,
        config: ExecutorConfig,
    ) -> Result<()> {
        let Some(task) = ledger.claim(task_id).await? else {
            debug!("Task {} was claimed elsewhere", task_id);
            return Ok(());
        };

        info!(
            "Claimed task {} for publish {} (attempt {})",
            task.id, task.publish_id, task.attempts
        );

        let attempts = u32::try_from(task.attempts).unwrap_or(u32::MAX);

        // Attempts lost to dead workers never reach the retry arm below
        if attempts > config.max_attempts {
            let reason = format!(
                "retries exhausted after {} attempt(s): worker lost",
                attempts - 1
            );
            orchestrator.abandon(&task, &reason).await?;
            return Ok(());
        }

        match orchestrator.run(&task).await {
            Ok(CommitOutcome::Completed(summary)) => {
                info!(
                    "Task {} complete ({} chunk(s) written)",
                    task.id, summary.chunks_written
                );
            }
            Ok(CommitOutcome::Failed(reason)) => {
                warn!("Task {} ended FAILED: {}", task.id, reason);
            }
            Err(e) if e.class() == ErrorClass::Transient && attempts < config.max_attempts => {
                let delay = config.retry_backoff.delay(attempts);
                warn!(
                    "Task {} attempt {}/{} failed ({}), retrying in {:?}",
                    task.id, attempts, config.max_attempts, e, delay
                );
                ledger
                    .requeue(task.id, Utc::now() + to_chrono(delay), &e.to_string())
                    .await?;
            }
            Err(e) => {
                let reason = match e.class() {
                    ErrorClass::Transient => {
                        format!("retries exhausted after {} attempt(s): {}", attempts, e)
                    }
                    ErrorClass::Permanent => e.to_string(),
                };
                orchestrator.abandon(&task, &reason).await?;
            }
        }

        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdn::testing::{MemoryCdnTable, RecordingPurge};
    use crate::config::EnvironmentConfig;
    use crate::store::PublishStore;
    use crate::store::memory::MemoryStore;
    use crate::worker::commit::CommitConfig;
    use crate::worker::invalidator::Invalidator;
    use crate::worker::writer::TableWriter;
    use ferry_core::domain::item::Item;
    use ferry_core::domain::publish::PublishStatus;
    use ferry_core::domain::task::{Task, TaskStatus};

    struct Harness {
        store: Arc<MemoryStore>,
        table: Arc<MemoryCdnTable>,
        orchestrator: Arc<CommitOrchestrator>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let table = Arc::new(MemoryCdnTable::new());
        let purge = Arc::new(RecordingPurge::new());
        let orchestrator = Arc::new(CommitOrchestrator::new(
            store.clone(),
            store.clone(),
            // One table attempt per task attempt, so throttling surfaces
            TableWriter::new(table.clone(), 1, Backoff::ZERO),
            Invalidator::new(
                Some(purge),
                vec![EnvironmentConfig::new("live")],
                100,
                Duration::ZERO,
            ),
            CommitConfig::default(),
        ));
        Harness {
            store,
            table,
            orchestrator,
        }
    }

    fn executor(h: &Harness, max_attempts: u32) -> TaskExecutor {
        TaskExecutor::new(
            h.store.clone(),
            h.orchestrator.clone(),
            ExecutorConfig {
                workers: 2,
                poll_interval: Duration::from_millis(10),
                max_attempts,
                retry_backoff: Backoff::ZERO,
                stale_after: Duration::from_secs(60),
            },
        )
    }

    async fn commit_requested(store: &MemoryStore) -> Task {
        let publish = store.create_publish("live").await.unwrap();
        let items = ["/a", "/b"]
            .iter()
            .enumerate()
            .map(|(n, path)| Item {
                publish_id: publish.id,
                web_path: path.to_string(),
                object_key: Some(format!("{:064x}", n)),
                content_type: None,
                link_to: None,
            })
            .collect();
        store.add_items(publish.id, items).await.unwrap();
        store.create_task(publish.id, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_throttled_attempts_retried_until_complete() {
        let h = harness();
        let executor = executor(&h, 5);
        let task = commit_requested(&h.store).await;
        h.table.throttle_next(2);

        for _ in 0..3 {
            assert_eq!(executor.poll_once().await.unwrap(), 1);
        }

        let task = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.attempts, 3);
        assert_eq!(h.table.entries("live").len(), 2);

        let publish = h.store.get_publish(task.publish_id).await.unwrap().unwrap();
        assert_eq!(publish.status, PublishStatus::Complete);

        assert_eq!(executor.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_task_and_publish() {
        let h = harness();
        let executor = executor(&h, 2);
        let task = commit_requested(&h.store).await;
        h.table.throttle_next(10);

        executor.poll_once().await.unwrap();
        executor.poll_once().await.unwrap();

        let task = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 2);
        assert!(task.error.unwrap().starts_with("retries exhausted after 2 attempt(s)"));

        let publish = h.store.get_publish(task.publish_id).await.unwrap().unwrap();
        assert_eq!(publish.status, PublishStatus::Failed);
    }

    #[tokio::test]
    async fn test_task_claimed_once_across_executors() {
        let h = harness();
        let first = executor(&h, 5);
        let second = executor(&h, 5);
        let task = commit_requested(&h.store).await;

        let (a, b) = tokio::join!(first.poll_once(), second.poll_once());
        a.unwrap();
        b.unwrap();

        let task = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.attempts, 1);
        assert_eq!(h.table.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_task_recovered() {
        let h = harness();
        let executor = executor(&h, 5);
        let task = commit_requested(&h.store).await;

        // A worker claimed the task and went silent
        h.store.claim(task.id).await.unwrap().unwrap();
        h.store
            .set_task_updated_at(task.id, Utc::now() - chrono::Duration::minutes(10))
            .await;

        assert_eq!(executor.poll_once().await.unwrap(), 1);

        let task = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.attempts, 2);
    }

    #[tokio::test]
    async fn test_repeatedly_orphaned_task_fails_at_attempt_cap() {
        let h = harness();
        let executor = executor(&h, 2);
        let task = commit_requested(&h.store).await;

        // Two workers in a row die holding the task
        for _ in 0..2 {
            h.store.claim(task.id).await.unwrap().unwrap();
            h.store
                .set_task_updated_at(task.id, Utc::now() - chrono::Duration::minutes(10))
                .await;
            assert_eq!(h.store.requeue_stale(Utc::now()).await.unwrap(), 1);
        }

        assert_eq!(executor.poll_once().await.unwrap(), 1);

        let task = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);
        assert!(task.error.unwrap().starts_with("retries exhausted after 2 attempt(s)"));
        assert_eq!(h.table.calls(), 0);

        let publish = h.store.get_publish(task.publish_id).await.unwrap().unwrap();
        assert_eq!(publish.status, PublishStatus::Pending);

        assert_eq!(executor.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delayed_task_not_started_early() {
        let h = harness();
        let executor = executor(&h, 5);
        let task = commit_requested(&h.store).await;
        h.store.claim(task.id).await.unwrap().unwrap();
        h.store
            .requeue(task.id, Utc::now() + chrono::Duration::minutes(5), "throttled")
            .await
            .unwrap();

        assert_eq!(executor.poll_once().await.unwrap(), 0);
        let task = h.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::NotStarted);
    }
}
