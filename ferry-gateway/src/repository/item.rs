//! Item Repository
//!
//! Handles all database operations on the `items` table.

use ferry_core::domain::item::Item;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// All items of a publish, ordered by web path
pub async fn find_by_publish(pool: &PgPool, publish_id: Uuid) -> Result<Vec<Item>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT publish_id, web_path, object_key, content_type, link_to
        FROM items
        WHERE publish_id = $1
        ORDER BY web_path ASC
        "#,
    )
    .bind(publish_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Which of `paths` already exist in the publish
pub async fn find_existing_paths(
    conn: &mut PgConnection,
    publish_id: Uuid,
    paths: &[String],
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT web_path FROM items
        WHERE publish_id = $1 AND web_path = ANY($2)
        ORDER BY web_path ASC
        "#,
    )
    .bind(publish_id)
    .bind(paths)
    .fetch_all(conn)
    .await
}

pub async fn insert(conn: &mut PgConnection, item: &Item) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO items (publish_id, web_path, object_key, content_type, link_to)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(item.publish_id)
    .bind(&item.web_path)
    .bind(&item.object_key)
    .bind(&item.content_type)
    .bind(&item.link_to)
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete the given paths from a publish, returning how many existed
pub async fn delete_paths(
    conn: &mut PgConnection,
    publish_id: Uuid,
    paths: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM items WHERE publish_id = $1 AND web_path = ANY($2)")
        .bind(publish_id)
        .bind(paths)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ItemRow {
    publish_id: Uuid,
    web_path: String,
    object_key: Option<String>,
    content_type: Option<String>,
    link_to: Option<String>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            publish_id: row.publish_id,
            web_path: row.web_path,
            object_key: row.object_key,
            content_type: row.content_type,
            link_to: row.link_to,
        }
    }
}
