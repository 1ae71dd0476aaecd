use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create publishes table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publishes (
            id UUID PRIMARY KEY,
            env VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            version BIGINT NOT NULL DEFAULT 0,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create items table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            publish_id UUID NOT NULL REFERENCES publishes(id) ON DELETE CASCADE,
            web_path TEXT NOT NULL,
            object_key VARCHAR(255),
            content_type VARCHAR(255),
            link_to TEXT,
            PRIMARY KEY (publish_id, web_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create tasks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id UUID PRIMARY KEY,
            publish_id UUID NOT NULL REFERENCES publishes(id) ON DELETE CASCADE,
            status VARCHAR(50) NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
            not_before TIMESTAMPTZ,
            deadline TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one unfinished task per publish
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active_publish
        ON tasks(publish_id)
        WHERE status IN ('NOT_STARTED', 'IN_PROGRESS')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at)")
        .execute(pool)
        .await?;

    // Paths written so far by each task
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_progress (
            task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            web_path TEXT NOT NULL,
            PRIMARY KEY (task_id, web_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commit_locks (
            publish_id UUID PRIMARY KEY REFERENCES publishes(id) ON DELETE CASCADE,
            task_id UUID NOT NULL,
            acquired_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // CDN-facing live mappings
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cdn_entries (
            env VARCHAR(255) NOT NULL,
            web_path TEXT NOT NULL,
            object_key VARCHAR(255) NOT NULL,
            content_type VARCHAR(255),
            publish_id UUID NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (env, web_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
