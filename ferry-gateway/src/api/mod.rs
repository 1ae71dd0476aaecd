//! API Module
//!
//! HTTP API layer of the gateway: staging publishes and triggering commits.

pub mod error;
pub mod health;
pub mod publish;
pub mod task;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::api::error::{ApiError, ApiResult};
use crate::store::{PublishStore, TaskLedger};

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub publishes: Arc<dyn PublishStore>,
    pub ledger: Arc<dyn TaskLedger>,

    /// Environments clients may publish to
    pub environments: Arc<Vec<String>>,

    /// Deadline given to commit tasks that do not request one
    pub default_task_deadline: Option<Duration>,
}

impl AppState {
    /// Rejects paths naming an environment the gateway does not serve
    pub fn check_env(&self, env: &str) -> ApiResult<()> {
        if self.environments.iter().any(|e| e == env) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("Environment {} not found", env)))
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Publish endpoints
        .route("/{env}/publish", post(publish::create_publish))
        .route(
            "/{env}/publish/{id}",
            get(publish::get_publish).put(publish::add_items),
        )
        .route("/{env}/publish/{id}/items", delete(publish::remove_items))
        .route("/{env}/publish/{id}/commit", post(task::commit_publish))
        // Task endpoints
        .route("/task/{id}", get(task::get_task))
        .route("/task/{id}/cancel", post(task::cancel_task))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
