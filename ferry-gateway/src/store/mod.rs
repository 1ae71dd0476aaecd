//! Store layer
//!
//! The durable state the commit pipeline works against: the publish/item
//! store and the task ledger. Both are trait-based so workers and services can
//! run against Postgres in production and an in-memory store in tests.

mod postgres;

#[cfg(test)]
pub mod memory;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::domain::item::Item;
use ferry_core::domain::publish::{Publish, PublishStatus};
use ferry_core::domain::task::Task;
use uuid::Uuid;

use crate::error::Result;

pub use postgres::PgStore;

/// Durable record of publishes and their staged items
#[async_trait]
pub trait PublishStore: Send + Sync {
    /// Creates a new publish in PENDING
    async fn create_publish(&self, env: &str) -> Result<Publish>;

    /// Loads a publish together with its items (ordered by path)
    async fn get_publish(&self, id: Uuid) -> Result<Option<Publish>>;

    /// Loads a publish without its items
    async fn find_publish(&self, id: Uuid) -> Result<Option<Publish>>;

    /// Stages items in a pending publish
    ///
    /// Fails with `Conflict` if the publish has left PENDING or any path is
    /// already staged. Either every item is added or none is.
    async fn add_items(&self, publish_id: Uuid, items: Vec<Item>) -> Result<()>;

    /// Drops staged paths from a pending publish, returning how many existed
    async fn remove_items(&self, publish_id: Uuid, paths: &[String]) -> Result<u64>;

    /// Moves a publish to `next` if it is still at `expected_version`
    ///
    /// Fails with `Conflict` for a transition the state machine forbids and
    /// `StaleState` when another writer changed the publish first.
    async fn transition(
        &self,
        id: Uuid,
        expected_version: i64,
        next: PublishStatus,
        error: Option<&str>,
    ) -> Result<Publish>;

    /// The frozen, path-ordered item list of a publish that has left PENDING
    async fn freeze_snapshot(&self, id: Uuid) -> Result<Vec<Item>>;

    /// Takes the per-publish commit lease for `task_id`, failing with
    /// `LockHeld` while another task's lease is live
    async fn acquire_commit_lock(&self, publish_id: Uuid, task_id: Uuid, ttl: Duration)
    -> Result<()>;

    /// Extends a lease; fails with `LockHeld` if it was lost
    async fn renew_commit_lock(&self, publish_id: Uuid, task_id: Uuid, ttl: Duration)
    -> Result<()>;

    async fn release_commit_lock(&self, publish_id: Uuid, task_id: Uuid) -> Result<()>;
}

/// Durable record of commit tasks
#[async_trait]
pub trait TaskLedger: Send + Sync {
    /// Creates a NOT_STARTED task, failing with `Conflict` if the publish
    /// already has an unfinished one
    async fn create_task(&self, publish_id: Uuid, deadline: Option<DateTime<Utc>>)
    -> Result<Task>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Up to `limit` claimable tasks, oldest first
    async fn list_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>>;

    /// Atomically moves NOT_STARTED -> IN_PROGRESS and counts the attempt;
    /// `None` if the task was not claimable
    async fn claim(&self, id: Uuid) -> Result<Option<Task>>;

    /// Marks an in-progress task as alive
    async fn heartbeat(&self, id: Uuid) -> Result<()>;

    /// Returns an in-progress task to NOT_STARTED until `not_before`
    async fn requeue(&self, id: Uuid, not_before: DateTime<Utc>, error: &str) -> Result<()>;

    async fn complete(&self, id: Uuid) -> Result<()>;

    async fn fail(&self, id: Uuid, error: &str) -> Result<()>;

    /// Flags an unfinished task for cancellation
    async fn request_cancel(&self, id: Uuid) -> Result<Task>;

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool>;

    /// Persists paths a task has written
    async fn record_progress(&self, id: Uuid, paths: &[String]) -> Result<()>;

    async fn load_progress(&self, id: Uuid) -> Result<HashSet<String>>;

    /// Returns in-progress tasks silent since `cutoff` to the queue
    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
