//! Task API Handlers
//!
//! HTTP endpoints for requesting commits and following their tasks.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use ferry_core::domain::task::Task;
use ferry_core::dto::task::CommitRequest;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::{publish_service, task_service};

/// POST /{env}/publish/{id}/commit
/// Queue a commit of the publish
///
/// Query parameters:
/// - `deadline` (optional): RFC 3339 time after which the task is abandoned
pub async fn commit_publish(
    State(state): State<AppState>,
    Path((env, id)): Path<(String, Uuid)>,
    Query(req): Query<CommitRequest>,
) -> ApiResult<Json<Task>> {
    tracing::info!("Commit requested for publish {} in {}", id, env);

    state.check_env(&env)?;
    publish_service::ensure_env(state.publishes.as_ref(), &env, id).await?;

    let task = task_service::request_commit(
        state.publishes.as_ref(),
        state.ledger.as_ref(),
        id,
        req,
        state.default_task_deadline,
    )
    .await?;

    Ok(Json(task))
}

/// GET /task/{id}
/// Get the latest persisted state of a task
pub async fn get_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Task>> {
    tracing::debug!("Getting task: {}", id);

    let task = task_service::get_task_status(state.ledger.as_ref(), id).await?;

    Ok(Json(task))
}

/// POST /task/{id}/cancel
/// Request cancellation of an unfinished task
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = task_service::cancel_task(state.ledger.as_ref(), id).await?;

    Ok(Json(task))
}
