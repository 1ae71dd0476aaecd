//! CDN purge interface

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::CdnError;

#[async_trait]
pub trait PurgeApi: Send + Sync {
    /// Submits one batch of URLs (or paths) for cache invalidation
    async fn purge(&self, env: &str, urls: &[String]) -> Result<(), CdnError>;
}

/// Purge API client speaking JSON over HTTP
///
/// Posts `{"objects": [...]}` to `{endpoint}/{env}`.
pub struct HttpPurgeClient {
    client: Client,
    endpoint: String,
}

impl HttpPurgeClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    objects: &'a [String],
}

#[async_trait]
impl PurgeApi for HttpPurgeClient {
    async fn purge(&self, env: &str, urls: &[String]) -> Result<(), CdnError> {
        let url = format!("{}/{}", self.endpoint, env);

        let response = self
            .client
            .post(&url)
            .json(&PurgeRequest { objects: urls })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

fn classify_status(status: StatusCode, body: String) -> CdnError {
    let message = format!("purge returned {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        CdnError::Throttled(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        CdnError::Unavailable(message)
    } else {
        CdnError::Rejected(message)
    }
}
