//! Cache invalidator
//!
//! Expands the paths changed by a commit into the URLs cached at the CDN edge
//! and submits them to the purge API in batches, spaced out to stay inside
//! the API's quota. A failed submission is logged and reported in the result;
//! it never fails the commit.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cdn::PurgeApi;
use crate::config::EnvironmentConfig;

static OSTREE_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*/ostree/repo/refs/heads/.*/(base|standard)$").expect("static regex")
});

/// Outcome of invalidating one commit's paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationResult {
    /// URLs accepted by the purge API
    pub submitted: usize,
    pub batches: usize,
    /// One message per failed batch
    pub failures: Vec<String>,
    /// Purging is not enabled for the environment
    pub skipped: bool,
}

impl InvalidationResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Invalidator {
    purge: Option<Arc<dyn PurgeApi>>,
    environments: HashMap<String, EnvironmentConfig>,
    batch_size: usize,
    min_interval: Duration,
    last_submission: Mutex<Option<Instant>>,
}

impl Invalidator {
    pub fn new(
        purge: Option<Arc<dyn PurgeApi>>,
        environments: Vec<EnvironmentConfig>,
        batch_size: usize,
        min_interval: Duration,
    ) -> Self {
        Self {
            purge,
            environments: environments
                .into_iter()
                .map(|env| (env.name.clone(), env))
                .collect(),
            batch_size: batch_size.max(1),
            min_interval,
            last_submission: Mutex::new(None),
        }
    }

    pub async fn invalidate(&self, env: &str, paths: &[String]) -> InvalidationResult {
        let mut result = InvalidationResult::default();
        if paths.is_empty() {
            return result;
        }

        let (Some(purge), Some(config)) = (&self.purge, self.environments.get(env)) else {
            info!("Purge is not configured for {}, skipping flush", env);
            result.skipped = true;
            return result;
        };
        if !config.purge_enabled {
            info!("Purge is not enabled for {}, skipping flush", env);
            result.skipped = true;
            return result;
        }

        let urls = urls_for_flush(config, paths);
        for batch in urls.chunks(self.batch_size) {
            self.pace().await;

            match purge.purge(env, batch).await {
                Ok(()) => {
                    result.submitted += batch.len();
                    result.batches += 1;
                }
                Err(e) => {
                    warn!("Failed to purge {} URL(s) in {}: {}", batch.len(), env, e);
                    result.failures.push(e.to_string());
                }
            }
        }

        info!(
            "Flushed {} of {} URL(s) for {} ({} failed batch(es))",
            result.submitted,
            urls.len(),
            env,
            result.failures.len()
        );
        result
    }

    /// Waits until `min_interval` has passed since the previous submission
    async fn pace(&self) {
        let mut last = self.last_submission.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// TTL the CDN edge applies to `path`, as used in ARLs
///
/// Must match the caching rules configured at the edge.
pub fn arl_ttl(path: &str) -> &'static str {
    if path.ends_with("/repodata/repomd.xml") || path.ends_with('/') {
        "4h"
    } else if path.ends_with("/PULP_MANIFEST")
        || path.ends_with("/listing")
        || path.contains("/repodata/")
        || OSTREE_HEAD.is_match(path)
    {
        "10m"
    } else {
        "30d"
    }
}

/// Every URL that may hold a cached copy of one of `paths`
///
/// With no base URLs or ARL templates configured the paths themselves are
/// returned.
pub fn urls_for_flush(config: &EnvironmentConfig, paths: &[String]) -> Vec<String> {
    if config.flush_urls.is_empty() && config.arl_templates.is_empty() {
        let unique: BTreeSet<&String> = paths.iter().collect();
        return unique.into_iter().cloned().collect();
    }

    let relative: BTreeSet<&str> = paths.iter().map(|p| p.trim_start_matches('/')).collect();

    let mut urls = Vec::new();
    for base in &config.flush_urls {
        let base = base.trim_end_matches('/');
        urls.extend(relative.iter().map(|path| format!("{}/{}", base, path)));
    }
    for template in &config.arl_templates {
        urls.extend(
            relative
                .iter()
                .map(|path| template.replace("{path}", path).replace("{ttl}", arl_ttl(path))),
        );
    }
    urls
}
