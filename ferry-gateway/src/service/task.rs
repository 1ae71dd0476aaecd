//! Task Service
//!
//! The trigger surface of the commit pipeline: requesting a commit,
//! querying a task and cancelling it.

use std::time::Duration;

use chrono::Utc;
use ferry_core::domain::task::Task;
use ferry_core::dto::task::CommitRequest;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::store::{PublishStore, TaskLedger};

/// Queue a commit of `publish_id`
///
/// Fails with `Conflict` if the publish is already complete or another commit
/// task for it has not finished.
pub async fn request_commit(
    publishes: &dyn PublishStore,
    ledger: &dyn TaskLedger,
    publish_id: Uuid,
    req: CommitRequest,
    default_deadline: Option<Duration>,
) -> Result<Task> {
    let publish = publishes
        .get_publish(publish_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("publish {}", publish_id)))?;

    if !publish.status.is_committable() {
        return Err(GatewayError::Conflict(format!(
            "publish {} is {} and cannot be committed",
            publish_id, publish.status
        )));
    }

    let deadline = req.deadline.or_else(|| {
        default_deadline
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d)
    });

    let task = ledger.create_task(publish_id, deadline).await?;

    tracing::info!("Commit task {} queued for publish {}", task.id, publish_id);

    Ok(task)
}

/// Get a task by ID
pub async fn get_task_status(ledger: &dyn TaskLedger, id: Uuid) -> Result<Task> {
    ledger
        .get_task(id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("task {}", id)))
}

/// Flag a task for cancellation; the worker honors it between chunks
pub async fn cancel_task(ledger: &dyn TaskLedger, id: Uuid) -> Result<Task> {
    let task = ledger.request_cancel(id).await?;

    tracing::info!("Cancellation requested for task {}", id);

    Ok(task)
}
