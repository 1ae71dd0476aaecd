//! Publish Repository
//!
//! Handles all database operations on the `publishes` table.

use ferry_core::domain::publish::{Publish, PublishStatus};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Create a new pending publish
pub async fn create(pool: &PgPool, env: &str) -> Result<Publish, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let publish = Publish {
        id,
        env: env.to_string(),
        status: PublishStatus::Pending,
        version: 0,
        created_at: now,
        updated_at: now,
        error: None,
        items: Vec::new(),
    };

    sqlx::query(
        r#"
        INSERT INTO publishes (id, env, status, version, created_at, updated_at)
        VALUES ($1, $2, $3, 0, $4, $4)
        "#,
    )
    .bind(id)
    .bind(env)
    .bind(PublishStatus::Pending.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(publish)
}

/// Find a publish by ID (items not loaded)
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Publish>, sqlx::Error> {
    let row = sqlx::query_as::<_, PublishRow>(
        r#"
        SELECT id, env, status, version, error, created_at, updated_at
        FROM publishes
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Lock the publish row for the rest of the transaction and return its status
pub async fn lock_status(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<PublishStatus>, sqlx::Error> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM publishes WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;

    Ok(status.map(|s| string_to_status(&s)))
}

/// Bump the update timestamp without changing status
pub async fn touch(conn: &mut PgConnection, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE publishes SET updated_at = $1 WHERE id = $2")
        .bind(chrono::Utc::now())
        .bind(id)
        .execute(conn)
        .await?;

    Ok(())
}

/// Move a publish to `status` if it is still at `expected_version`
///
/// Returns `None` when the version no longer matches (or the row is gone).
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    expected_version: i64,
    status: PublishStatus,
    error: Option<&str>,
) -> Result<Option<Publish>, sqlx::Error> {
    let row = sqlx::query_as::<_, PublishRow>(
        r#"
        UPDATE publishes
        SET status = $1, error = $2, version = version + 1, updated_at = $3
        WHERE id = $4 AND version = $5
        RETURNING id, env, status, version, error, created_at, updated_at
        "#,
    )
    .bind(status.as_str())
    .bind(error)
    .bind(chrono::Utc::now())
    .bind(id)
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_status(s: &str) -> PublishStatus {
    s.parse().unwrap_or(PublishStatus::Pending)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PublishRow {
    id: Uuid,
    env: String,
    status: String,
    version: i64,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<PublishRow> for Publish {
    fn from(row: PublishRow) -> Self {
        Publish {
            id: row.id,
            env: row.env,
            status: string_to_status(&row.status),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            error: row.error,
            items: Vec::new(),
        }
    }
}
