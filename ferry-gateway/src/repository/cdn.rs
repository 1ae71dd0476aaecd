//! CDN Entry Repository
//!
//! Writes to the `cdn_entries` table read by the delivery tier.

use ferry_core::domain::cdn::CdnEntry;
use sqlx::PgConnection;

/// Insert or overwrite the mapping for (env, web_path)
pub async fn upsert(conn: &mut PgConnection, env: &str, entry: &CdnEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO cdn_entries (env, web_path, object_key, content_type, publish_id, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (env, web_path) DO UPDATE SET
            object_key = EXCLUDED.object_key,
            content_type = EXCLUDED.content_type,
            publish_id = EXCLUDED.publish_id,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(env)
    .bind(&entry.web_path)
    .bind(&entry.object_key)
    .bind(&entry.content_type)
    .bind(entry.publish_id)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn delete(conn: &mut PgConnection, env: &str, web_path: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM cdn_entries WHERE env = $1 AND web_path = $2")
        .bind(env)
        .bind(web_path)
        .execute(conn)
        .await?;

    Ok(())
}
