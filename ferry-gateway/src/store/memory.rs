//! In-memory store used by tests
//!
//! Mirrors the Postgres store's semantics (conditional updates, exclusive
//! active task per publish, expiring commit leases) behind a single mutex.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::domain::item::Item;
use ferry_core::domain::publish::{Publish, PublishStatus};
use ferry_core::domain::task::{Task, TaskStatus};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PublishStore, TaskLedger};
use crate::error::{GatewayError, Result};

#[derive(Default)]
struct State {
    publishes: HashMap<Uuid, Publish>,
    items: HashMap<Uuid, BTreeMap<String, Item>>,
    tasks: HashMap<Uuid, Task>,
    progress: HashMap<Uuid, HashSet<String>>,
    locks: HashMap<Uuid, (Uuid, DateTime<Utc>)>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a task's liveness timestamp
    pub async fn set_task_updated_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(task) = self.state.lock().await.tasks.get_mut(&id) {
            task.updated_at = at;
        }
    }

    /// Current holder of a publish's commit lease, if any
    pub async fn lock_holder(&self, publish_id: Uuid) -> Option<Uuid> {
        self.state
            .lock()
            .await
            .locks
            .get(&publish_id)
            .map(|(holder, _)| *holder)
    }
}

fn not_found(kind: &str, id: Uuid) -> GatewayError {
    GatewayError::NotFound(format!("{} {}", kind, id))
}

fn expiry(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

#[async_trait]
impl PublishStore for MemoryStore {
    async fn create_publish(&self, env: &str) -> Result<Publish> {
        let now = Utc::now();
        let publish = Publish {
            id: Uuid::new_v4(),
            env: env.to_string(),
            status: PublishStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
            error: None,
            items: Vec::new(),
        };

        let mut state = self.state.lock().await;
        state.publishes.insert(publish.id, publish.clone());
        state.items.insert(publish.id, BTreeMap::new());
        Ok(publish)
    }

    async fn get_publish(&self, id: Uuid) -> Result<Option<Publish>> {
        let state = self.state.lock().await;
        Ok(state.publishes.get(&id).map(|p| {
            let mut publish = p.clone();
            publish.items = state
                .items
                .get(&id)
                .map(|items| items.values().cloned().collect())
                .unwrap_or_default();
            publish
        }))
    }

    async fn find_publish(&self, id: Uuid) -> Result<Option<Publish>> {
        let state = self.state.lock().await;
        Ok(state.publishes.get(&id).cloned())
    }

    async fn add_items(&self, publish_id: Uuid, items: Vec<Item>) -> Result<()> {
        let mut state = self.state.lock().await;

        let publish = state
            .publishes
            .get(&publish_id)
            .ok_or_else(|| not_found("publish", publish_id))?;
        if !publish.status.accepts_items() {
            return Err(GatewayError::Conflict(format!(
                "publish {} is {} and no longer accepts items",
                publish_id, publish.status
            )));
        }

        let staged = state.items.entry(publish_id).or_default();
        if let Some(item) = items.iter().find(|i| staged.contains_key(&i.web_path)) {
            return Err(GatewayError::Conflict(format!(
                "path {} already staged in publish {}",
                item.web_path, publish_id
            )));
        }
        for item in items {
            staged.insert(item.web_path.clone(), item);
        }

        if let Some(publish) = state.publishes.get_mut(&publish_id) {
            publish.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn remove_items(&self, publish_id: Uuid, paths: &[String]) -> Result<u64> {
        let mut state = self.state.lock().await;

        let publish = state
            .publishes
            .get(&publish_id)
            .ok_or_else(|| not_found("publish", publish_id))?;
        if !publish.status.accepts_items() {
            return Err(GatewayError::Conflict(format!(
                "publish {} is {} and its items are frozen",
                publish_id, publish.status
            )));
        }

        let staged = state.items.entry(publish_id).or_default();
        let removed = paths.iter().filter(|p| staged.remove(*p).is_some()).count();
        Ok(removed as u64)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected_version: i64,
        next: PublishStatus,
        error: Option<&str>,
    ) -> Result<Publish> {
        let mut state = self.state.lock().await;
        let publish = state
            .publishes
            .get_mut(&id)
            .ok_or_else(|| not_found("publish", id))?;

        if publish.version != expected_version {
            return Err(GatewayError::StaleState(format!(
                "publish {} is at version {}, expected {}",
                id, publish.version, expected_version
            )));
        }
        if !publish.status.can_transition_to(next) {
            return Err(GatewayError::Conflict(format!(
                "publish {} cannot move from {} to {}",
                id, publish.status, next
            )));
        }

        publish.status = next;
        publish.error = error.map(str::to_string);
        publish.version += 1;
        publish.updated_at = Utc::now();
        Ok(publish.clone())
    }

    async fn freeze_snapshot(&self, id: Uuid) -> Result<Vec<Item>> {
        let state = self.state.lock().await;
        let publish = state.publishes.get(&id).ok_or_else(|| not_found("publish", id))?;
        if publish.status == PublishStatus::Pending {
            return Err(GatewayError::Conflict(format!(
                "publish {} is still PENDING; items are not frozen",
                id
            )));
        }
        Ok(state
            .items
            .get(&id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn acquire_commit_lock(
        &self,
        publish_id: Uuid,
        task_id: Uuid,
        ttl: Duration,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some((holder, expires_at)) = state.locks.get(&publish_id) {
            if *holder != task_id && *expires_at >= now {
                return Err(GatewayError::LockHeld {
                    publish_id,
                    holder: *holder,
                });
            }
        }
        state.locks.insert(publish_id, (task_id, expiry(ttl)));
        Ok(())
    }

    async fn renew_commit_lock(&self, publish_id: Uuid, task_id: Uuid, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.locks.get_mut(&publish_id) {
            Some((holder, expires_at)) if *holder == task_id => {
                *expires_at = expiry(ttl);
                Ok(())
            }
            other => Err(GatewayError::LockHeld {
                publish_id,
                holder: other.map(|(holder, _)| *holder).unwrap_or_default(),
            }),
        }
    }

    async fn release_commit_lock(&self, publish_id: Uuid, task_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.locks.get(&publish_id).is_some_and(|(holder, _)| *holder == task_id) {
            state.locks.remove(&publish_id);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskLedger for MemoryStore {
    async fn create_task(&self, publish_id: Uuid, deadline: Option<DateTime<Utc>>) -> Result<Task> {
        let mut state = self.state.lock().await;
        if !state.publishes.contains_key(&publish_id) {
            return Err(not_found("publish", publish_id));
        }
        if state
            .tasks
            .values()
            .any(|t| t.publish_id == publish_id && !t.status.is_terminal())
        {
            return Err(GatewayError::Conflict(format!(
                "publish {} already has a commit in progress",
                publish_id
            )));
        }

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            publish_id,
            status: TaskStatus::NotStarted,
            attempts: 0,
            error: None,
            cancel_requested: false,
            not_before: None,
            deadline,
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn list_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        let mut ready: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.is_ready(now))
            .cloned()
            .collect();
        ready.sort_by_key(|t| t.created_at);
        ready.truncate(limit);
        Ok(ready)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::NotStarted => {
                task.status = TaskStatus::InProgress;
                task.attempts += 1;
                task.not_before = None;
                task.updated_at = Utc::now();
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn heartbeat(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.tasks.get_mut(&id) {
            if task.status == TaskStatus::InProgress {
                task.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn requeue(&self, id: Uuid, not_before: DateTime<Utc>, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.tasks.get_mut(&id) {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::NotStarted;
                task.not_before = Some(not_before);
                task.error = Some(error.to_string());
                task.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.tasks.get_mut(&id) {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Complete;
                task.error = None;
                task.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.tasks.get_mut(&id) {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Failed;
                task.error = Some(error.to_string());
                task.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> Result<Task> {
        let mut state = self.state.lock().await;
        let task = state.tasks.get_mut(&id).ok_or_else(|| not_found("task", id))?;
        if task.status.is_terminal() {
            return Err(GatewayError::Conflict(format!(
                "task {} is already {}",
                id, task.status
            )));
        }
        task.cancel_requested = true;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).is_some_and(|t| t.cancel_requested))
    }

    async fn record_progress(&self, id: Uuid, paths: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .progress
            .entry(id)
            .or_default()
            .extend(paths.iter().cloned());
        Ok(())
    }

    async fn load_progress(&self, id: Uuid) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(state.progress.get(&id).cloned().unwrap_or_default())
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for task in state.tasks.values_mut() {
            if task.status == TaskStatus::InProgress && task.updated_at < cutoff {
                task.status = TaskStatus::NotStarted;
                task.error = Some("worker heartbeat lost".to_string());
                task.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transition_with_old_version_is_stale() {
        let store = MemoryStore::new();
        let publish = store.create_publish("live").await.unwrap();

        let committing = store
            .transition(publish.id, publish.version, PublishStatus::Committing, None)
            .await
            .unwrap();
        assert_eq!(committing.version, publish.version + 1);

        // A second writer still holding the original version
        let err = store
            .transition(publish.id, publish.version, PublishStatus::Failed, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StaleState(_)));

        let current = store.get_publish(publish.id).await.unwrap().unwrap();
        assert_eq!(current.status, PublishStatus::Committing);
        assert_eq!(current.version, committing.version);
        assert_eq!(current.error, None);
    }

    #[tokio::test]
    async fn test_backward_transition_is_conflict() {
        let store = MemoryStore::new();
        let publish = store.create_publish("live").await.unwrap();
        let committing = store
            .transition(publish.id, publish.version, PublishStatus::Committing, None)
            .await
            .unwrap();

        let err = store
            .transition(publish.id, committing.version, PublishStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }
}
