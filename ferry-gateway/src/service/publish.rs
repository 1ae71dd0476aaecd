//! Publish Service
//!
//! Staging operations on pending publishes.

use std::collections::HashSet;

use ferry_core::domain::item::Item;
use ferry_core::domain::publish::Publish;
use ferry_core::dto::publish::ItemInput;
use ferry_core::validation::normalize_path;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::store::PublishStore;

/// Largest number of items accepted by one add request
pub const MAX_ITEMS_PER_REQUEST: usize = 10_000;

/// Create a new pending publish for `env`
pub async fn create_publish(store: &dyn PublishStore, env: &str) -> Result<Publish> {
    let publish = store.create_publish(env).await?;

    tracing::info!("Publish created: {} for env: {}", publish.id, env);

    Ok(publish)
}

/// Get a publish and its items
pub async fn get_publish(store: &dyn PublishStore, id: Uuid) -> Result<Publish> {
    store
        .get_publish(id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("publish {}", id)))
}

/// Fails with `NotFound` unless publish `id` exists in `env`
pub async fn ensure_env(store: &dyn PublishStore, env: &str, id: Uuid) -> Result<()> {
    match store.find_publish(id).await? {
        Some(publish) if publish.env == env => Ok(()),
        _ => Err(GatewayError::NotFound(format!("publish {}", id))),
    }
}

/// Validate and stage items, returning how many were added
///
/// The request is all-or-nothing: one invalid or duplicated item rejects it.
pub async fn add_items(
    store: &dyn PublishStore,
    publish_id: Uuid,
    inputs: Vec<ItemInput>,
) -> Result<usize> {
    if inputs.len() > MAX_ITEMS_PER_REQUEST {
        return Err(GatewayError::Validation(format!(
            "at most {} items may be added per request, got {}",
            MAX_ITEMS_PER_REQUEST,
            inputs.len()
        )));
    }

    let items = inputs
        .into_iter()
        .map(|input| input.validate(publish_id))
        .collect::<std::result::Result<Vec<Item>, _>>()?;

    if let Some(dup) = first_duplicate(&items) {
        return Err(GatewayError::Conflict(format!(
            "path {} appears more than once in request",
            dup
        )));
    }

    let count = items.len();
    store.add_items(publish_id, items).await?;

    tracing::info!("Added {} item(s) to publish {}", count, publish_id);

    Ok(count)
}

fn first_duplicate(items: &[Item]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .map(|item| item.web_path.as_str())
        .find(|path| !seen.insert(*path))
}

/// Drop staged paths from a pending publish, returning how many existed
pub async fn remove_items(
    store: &dyn PublishStore,
    publish_id: Uuid,
    paths: Vec<String>,
) -> Result<u64> {
    let paths: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
    let removed = store.remove_items(publish_id, &paths).await?;

    tracing::info!("Removed {} item(s) from publish {}", removed, publish_id);

    Ok(removed)
}
