//! Commit Lock Repository
//!
//! Row-level leases serializing commit work per publish. A lease is owned by
//! one task and expires unless renewed, so a crashed worker cannot hold a
//! publish forever.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Take (or re-take) the lease for `task_id`
///
/// Succeeds when no lease exists, the lease already belongs to `task_id`, or
/// the current holder's lease has expired. Returns the conflicting holder
/// when the lease could not be taken.
pub async fn acquire(
    pool: &PgPool,
    publish_id: Uuid,
    task_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<Option<Uuid>, sqlx::Error> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO commit_locks (publish_id, task_id, acquired_at, expires_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (publish_id) DO UPDATE SET
            task_id = EXCLUDED.task_id,
            acquired_at = EXCLUDED.acquired_at,
            expires_at = EXCLUDED.expires_at
        WHERE commit_locks.task_id = EXCLUDED.task_id
           OR commit_locks.expires_at < EXCLUDED.acquired_at
        "#,
    )
    .bind(publish_id)
    .bind(task_id)
    .bind(now)
    .bind(expires_at)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(None);
    }

    let holder: Option<Uuid> =
        sqlx::query_scalar("SELECT task_id FROM commit_locks WHERE publish_id = $1")
            .bind(publish_id)
            .fetch_optional(pool)
            .await?;

    // A nil holder means the lease was released between the two statements
    Ok(Some(holder.unwrap_or_default()))
}

/// Extend a lease still owned by `task_id`
pub async fn renew(
    pool: &PgPool,
    publish_id: Uuid,
    task_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE commit_locks SET expires_at = $1 WHERE publish_id = $2 AND task_id = $3",
    )
    .bind(expires_at)
    .bind(publish_id)
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn release(pool: &PgPool, publish_id: Uuid, task_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM commit_locks WHERE publish_id = $1 AND task_id = $2")
        .bind(publish_id)
        .bind(task_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
