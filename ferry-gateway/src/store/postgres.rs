//! Postgres-backed store
//!
//! Implements [`PublishStore`] and [`TaskLedger`] on top of the repository
//! functions. Multi-statement operations run in a transaction holding the
//! publish row lock so they serialize against status transitions.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::domain::item::Item;
use ferry_core::domain::publish::{Publish, PublishStatus};
use ferry_core::domain::task::{Task, TaskStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PublishStore, TaskLedger};
use crate::error::{GatewayError, Result};
use crate::repository::{item_repository, lock_repository, publish_repository, task_repository};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lease_expiry(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

#[async_trait]
impl PublishStore for PgStore {
    async fn create_publish(&self, env: &str) -> Result<Publish> {
        Ok(publish_repository::create(&self.pool, env).await?)
    }

    async fn get_publish(&self, id: Uuid) -> Result<Option<Publish>> {
        let Some(mut publish) = publish_repository::find_by_id(&self.pool, id).await? else {
            return Ok(None);
        };
        publish.items = item_repository::find_by_publish(&self.pool, id).await?;
        Ok(Some(publish))
    }

    async fn find_publish(&self, id: Uuid) -> Result<Option<Publish>> {
        Ok(publish_repository::find_by_id(&self.pool, id).await?)
    }

    async fn add_items(&self, publish_id: Uuid, items: Vec<Item>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let status = publish_repository::lock_status(&mut tx, publish_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("publish {}", publish_id)))?;

        if !status.accepts_items() {
            return Err(GatewayError::Conflict(format!(
                "publish {} is {} and no longer accepts items",
                publish_id, status
            )));
        }

        let paths: Vec<String> = items.iter().map(|i| i.web_path.clone()).collect();
        let existing = item_repository::find_existing_paths(&mut tx, publish_id, &paths).await?;
        if let Some(path) = existing.first() {
            return Err(GatewayError::Conflict(format!(
                "path {} already staged in publish {}",
                path, publish_id
            )));
        }

        for item in &items {
            item_repository::insert(&mut tx, item).await?;
        }
        publish_repository::touch(&mut tx, publish_id).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_items(&self, publish_id: Uuid, paths: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let status = publish_repository::lock_status(&mut tx, publish_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("publish {}", publish_id)))?;

        if !status.accepts_items() {
            return Err(GatewayError::Conflict(format!(
                "publish {} is {} and its items are frozen",
                publish_id, status
            )));
        }

        let removed = item_repository::delete_paths(&mut tx, publish_id, paths).await?;
        publish_repository::touch(&mut tx, publish_id).await?;

        tx.commit().await?;
        Ok(removed)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected_version: i64,
        next: PublishStatus,
        error: Option<&str>,
    ) -> Result<Publish> {
        let current = publish_repository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("publish {}", id)))?;

        if current.version != expected_version {
            return Err(GatewayError::StaleState(format!(
                "publish {} is at version {}, expected {}",
                id, current.version, expected_version
            )));
        }
        if !current.status.can_transition_to(next) {
            return Err(GatewayError::Conflict(format!(
                "publish {} cannot move from {} to {}",
                id, current.status, next
            )));
        }

        let updated = publish_repository::update_status(&self.pool, id, expected_version, next, error)
            .await?
            .ok_or_else(|| {
                GatewayError::StaleState(format!(
                    "publish {} changed concurrently from version {}",
                    id, expected_version
                ))
            })?;

        tracing::info!("Publish {} moved {} -> {}", id, current.status, next);
        Ok(updated)
    }

    async fn freeze_snapshot(&self, id: Uuid) -> Result<Vec<Item>> {
        let publish = publish_repository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("publish {}", id)))?;

        if publish.status == PublishStatus::Pending {
            return Err(GatewayError::Conflict(format!(
                "publish {} is still PENDING; items are not frozen",
                id
            )));
        }

        Ok(item_repository::find_by_publish(&self.pool, id).await?)
    }

    async fn acquire_commit_lock(
        &self,
        publish_id: Uuid,
        task_id: Uuid,
        ttl: Duration,
    ) -> Result<()> {
        match lock_repository::acquire(&self.pool, publish_id, task_id, lease_expiry(ttl)).await? {
            None => {
                tracing::debug!("Task {} holds commit lock for publish {}", task_id, publish_id);
                Ok(())
            }
            Some(holder) => Err(GatewayError::LockHeld { publish_id, holder }),
        }
    }

    async fn renew_commit_lock(&self, publish_id: Uuid, task_id: Uuid, ttl: Duration) -> Result<()> {
        if lock_repository::renew(&self.pool, publish_id, task_id, lease_expiry(ttl)).await? {
            Ok(())
        } else {
            Err(GatewayError::LockHeld {
                publish_id,
                holder: Uuid::nil(),
            })
        }
    }

    async fn release_commit_lock(&self, publish_id: Uuid, task_id: Uuid) -> Result<()> {
        lock_repository::release(&self.pool, publish_id, task_id).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskLedger for PgStore {
    async fn create_task(&self, publish_id: Uuid, deadline: Option<DateTime<Utc>>) -> Result<Task> {
        task_repository::create_exclusive(&self.pool, publish_id, deadline)
            .await?
            .ok_or_else(|| {
                GatewayError::Conflict(format!(
                    "publish {} already has a commit in progress",
                    publish_id
                ))
            })
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(task_repository::find_by_id(&self.pool, id).await?)
    }

    async fn list_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(task_repository::find_ready(&self.pool, now, limit).await?)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(task_repository::claim(&self.pool, id).await?)
    }

    async fn heartbeat(&self, id: Uuid) -> Result<()> {
        task_repository::touch(&self.pool, id).await?;
        Ok(())
    }

    async fn requeue(&self, id: Uuid, not_before: DateTime<Utc>, error: &str) -> Result<()> {
        task_repository::requeue(&self.pool, id, not_before, error).await?;
        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        task_repository::finish(&self.pool, id, TaskStatus::Complete, None).await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        task_repository::finish(&self.pool, id, TaskStatus::Failed, Some(error)).await?;
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> Result<Task> {
        if let Some(task) = task_repository::request_cancel(&self.pool, id).await? {
            return Ok(task);
        }

        match task_repository::find_by_id(&self.pool, id).await? {
            Some(task) => Err(GatewayError::Conflict(format!(
                "task {} is already {}",
                id, task.status
            ))),
            None => Err(GatewayError::NotFound(format!("task {}", id))),
        }
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool> {
        Ok(task_repository::is_cancel_requested(&self.pool, id).await?)
    }

    async fn record_progress(&self, id: Uuid, paths: &[String]) -> Result<()> {
        task_repository::record_progress(&self.pool, id, paths).await?;
        Ok(())
    }

    async fn load_progress(&self, id: Uuid) -> Result<HashSet<String>> {
        let paths = task_repository::find_progress(&self.pool, id).await?;
        Ok(paths.into_iter().collect())
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(task_repository::requeue_stale(&self.pool, cutoff).await?)
    }
}
