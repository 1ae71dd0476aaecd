//! Publish API Handlers
//!
//! HTTP endpoints for staging items in a publish.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ferry_core::domain::publish::Publish;
use ferry_core::dto::publish::{ItemInput, RemoveItems};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::publish_service;

/// POST /{env}/publish
/// Create a new pending publish
pub async fn create_publish(
    State(state): State<AppState>,
    Path(env): Path<String>,
) -> ApiResult<(StatusCode, Json<Publish>)> {
    state.check_env(&env)?;

    let publish = publish_service::create_publish(state.publishes.as_ref(), &env).await?;

    Ok((StatusCode::CREATED, Json(publish)))
}

/// GET /{env}/publish/{id}
/// Get a publish with its items
pub async fn get_publish(
    State(state): State<AppState>,
    Path((env, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Publish>> {
    tracing::debug!("Getting publish: {}", id);

    state.check_env(&env)?;

    let publish = publish_service::get_publish(state.publishes.as_ref(), id).await?;
    if publish.env != env {
        return Err(ApiError::NotFound(format!("Publish {} not found", id)));
    }

    Ok(Json(publish))
}

/// PUT /{env}/publish/{id}
/// Stage items in a pending publish
pub async fn add_items(
    State(state): State<AppState>,
    Path((env, id)): Path<(String, Uuid)>,
    Json(items): Json<Vec<ItemInput>>,
) -> ApiResult<Json<Value>> {
    state.check_env(&env)?;
    publish_service::ensure_env(state.publishes.as_ref(), &env, id).await?;

    let added = publish_service::add_items(state.publishes.as_ref(), id, items).await?;

    Ok(Json(json!({ "added": added })))
}

/// DELETE /{env}/publish/{id}/items
/// Remove staged items from a pending publish
pub async fn remove_items(
    State(state): State<AppState>,
    Path((env, id)): Path<(String, Uuid)>,
    Json(req): Json<RemoveItems>,
) -> ApiResult<Json<Value>> {
    state.check_env(&env)?;
    publish_service::ensure_env(state.publishes.as_ref(), &env, id).await?;

    let removed = publish_service::remove_items(state.publishes.as_ref(), id, req.paths).await?;

    Ok(Json(json!({ "removed": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::state;
    use crate::store::PublishStore;
    use axum::response::IntoResponse;
    use ferry_core::domain::publish::PublishStatus;

    const KEY: &str = "aec070645fe53ee3b3763059376134f058cc337247c978add178b6ccdfb0019f";

    #[tokio::test]
    async fn test_create_and_stage() {
        let (state, _) = state();

        let (status, Json(publish)) = create_publish(State(state.clone()), Path("live".to_string()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(publish.status, PublishStatus::Pending);

        let items = vec![ItemInput {
            web_uri: "/content/a".to_string(),
            object_key: Some(KEY.to_string()),
            ..Default::default()
        }];
        let Json(body) = add_items(
            State(state.clone()),
            Path(("live".to_string(), publish.id)),
            Json(items),
        )
        .await
        .unwrap();
        assert_eq!(body["added"], 1);

        let Json(fetched) = get_publish(State(state), Path(("live".to_string(), publish.id)))
            .await
            .unwrap();
        assert_eq!(fetched.items.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_environment_not_found() {
        let (state, _) = state();

        let err = create_publish(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_publish_hidden_under_other_environment() {
        let (state, store) = state();
        let publish = store.create_publish("live").await.unwrap();

        let err = get_publish(State(state), Path(("pre".to_string(), publish.id)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_items_not_staged_through_other_environment() {
        let (state, store) = state();
        let publish = store.create_publish("live").await.unwrap();

        let items = vec![ItemInput {
            web_uri: "/content/a".to_string(),
            object_key: Some(KEY.to_string()),
            ..Default::default()
        }];
        let err = add_items(
            State(state.clone()),
            Path(("pre".to_string(), publish.id)),
            Json(items),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = remove_items(
            State(state),
            Path(("pre".to_string(), publish.id)),
            Json(RemoveItems {
                paths: vec!["/content/a".to_string()],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let publish = store.get_publish(publish.id).await.unwrap().unwrap();
        assert!(publish.items.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_item_is_bad_request() {
        let (state, store) = state();
        let publish = store.create_publish("live").await.unwrap();

        let items = vec![ItemInput {
            web_uri: "/a".to_string(),
            ..Default::default()
        }];
        let err = add_items(State(state), Path(("live".to_string(), publish.id)), Json(items))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
