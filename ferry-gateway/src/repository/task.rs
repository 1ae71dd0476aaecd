//! Task Repository
//!
//! Handles all database operations related to commit tasks and their
//! per-task write progress.

use chrono::{DateTime, Utc};
use ferry_core::domain::task::{Task, TaskStatus};
use sqlx::PgPool;
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, publish_id, status, attempts, error, cancel_requested, \
                            not_before, deadline, created_at, updated_at";

/// Create a task unless the publish already has an unfinished one
///
/// Relies on the partial unique index over active tasks, so concurrent
/// callers cannot both succeed. Returns `None` if another task is active.
pub async fn create_exclusive(
    pool: &PgPool,
    publish_id: Uuid,
    deadline: Option<DateTime<Utc>>,
) -> Result<Option<Task>, sqlx::Error> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, TaskRow>(&format!(
        r#"
        INSERT INTO tasks (id, publish_id, status, attempts, deadline, created_at, updated_at)
        VALUES ($1, $2, $3, 0, $4, $5, $5)
        ON CONFLICT (publish_id) WHERE status IN ('NOT_STARTED', 'IN_PROGRESS') DO NOTHING
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(publish_id)
    .bind(TaskStatus::NotStarted.as_str())
    .bind(deadline)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find a task by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Task>, sqlx::Error> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Not-started tasks whose backoff has elapsed, oldest first
pub async fn find_ready(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Task>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        r#"
        SELECT {TASK_COLUMNS} FROM tasks
        WHERE status = $1 AND (not_before IS NULL OR not_before <= $2)
        ORDER BY created_at ASC
        LIMIT $3
        "#
    ))
    .bind(TaskStatus::NotStarted.as_str())
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Compare-and-set NOT_STARTED -> IN_PROGRESS, counting the attempt
///
/// Returns `None` if another worker claimed the task first.
pub async fn claim(pool: &PgPool, id: Uuid) -> Result<Option<Task>, sqlx::Error> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        r#"
        UPDATE tasks
        SET status = $1, attempts = attempts + 1, not_before = NULL, updated_at = $2
        WHERE id = $3 AND status = $4
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(TaskStatus::InProgress.as_str())
    .bind(Utc::now())
    .bind(id)
    .bind(TaskStatus::NotStarted.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Refresh the liveness timestamp of an in-progress task
pub async fn touch(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE tasks SET updated_at = $1 WHERE id = $2 AND status = $3")
        .bind(Utc::now())
        .bind(id)
        .bind(TaskStatus::InProgress.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Return an in-progress task to the queue after a transient failure
pub async fn requeue(
    pool: &PgPool,
    id: Uuid,
    not_before: DateTime<Utc>,
    error: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = $1, not_before = $2, error = $3, updated_at = $4
        WHERE id = $5 AND status = $6
        "#,
    )
    .bind(TaskStatus::NotStarted.as_str())
    .bind(not_before)
    .bind(error)
    .bind(Utc::now())
    .bind(id)
    .bind(TaskStatus::InProgress.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Move a task to a terminal status; terminal tasks are never touched again
pub async fn finish(
    pool: &PgPool,
    id: Uuid,
    status: TaskStatus,
    error: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = $1, error = $2, updated_at = $3
        WHERE id = $4 AND status IN ($5, $6)
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(Utc::now())
    .bind(id)
    .bind(TaskStatus::NotStarted.as_str())
    .bind(TaskStatus::InProgress.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Flag an unfinished task for cancellation
pub async fn request_cancel(pool: &PgPool, id: Uuid) -> Result<Option<Task>, sqlx::Error> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        r#"
        UPDATE tasks
        SET cancel_requested = TRUE, updated_at = $1
        WHERE id = $2 AND status IN ($3, $4)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(Utc::now())
    .bind(id)
    .bind(TaskStatus::NotStarted.as_str())
    .bind(TaskStatus::InProgress.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn is_cancel_requested(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let flag: Option<bool> =
        sqlx::query_scalar("SELECT cancel_requested FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(flag.unwrap_or(false))
}

/// Return in-progress tasks with no heartbeat since `cutoff` to the queue
///
/// Returns the number of tasks requeued.
pub async fn requeue_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = $1, error = $2, updated_at = $3
        WHERE status = $4 AND updated_at < $5
        "#,
    )
    .bind(TaskStatus::NotStarted.as_str())
    .bind("worker heartbeat lost")
    .bind(Utc::now())
    .bind(TaskStatus::InProgress.as_str())
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Record paths written by a task; re-recording a path is a no-op
pub async fn record_progress(
    pool: &PgPool,
    task_id: Uuid,
    paths: &[String],
) -> Result<(), sqlx::Error> {
    if paths.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO task_progress (task_id, web_path)
        SELECT $1, path FROM UNNEST($2::text[]) AS path
        ON CONFLICT (task_id, web_path) DO NOTHING
        "#,
    )
    .bind(task_id)
    .bind(paths)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_progress(pool: &PgPool, task_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT web_path FROM task_progress WHERE task_id = $1")
        .bind(task_id)
        .fetch_all(pool)
        .await
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_status(s: &str) -> TaskStatus {
    s.parse().unwrap_or(TaskStatus::NotStarted)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    publish_id: Uuid,
    status: String,
    attempts: i32,
    error: Option<String>,
    cancel_requested: bool,
    not_before: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            publish_id: row.publish_id,
            status: string_to_status(&row.status),
            attempts: row.attempts,
            error: row.error,
            cancel_requested: row.cancel_requested,
            not_before: row.not_before,
            deadline: row.deadline,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
