use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod cdn;
pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod service;
pub mod store;
pub mod worker;

use crate::cdn::{CdnTable, HttpPurgeClient, PgCdnTable, PurgeApi};
use crate::config::Config;
use crate::store::PgStore;
use crate::worker::{
    Backoff, CommitConfig, CommitOrchestrator, ExecutorConfig, Invalidator, TableWriter,
    TaskExecutor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ferry Gateway...");

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let table: Arc<dyn CdnTable> = Arc::new(PgCdnTable::new(pool));
    let purge = config
        .purge_url
        .clone()
        .map(|url| Arc::new(HttpPurgeClient::new(url)) as Arc<dyn PurgeApi>);
    if purge.is_none() {
        tracing::warn!("No purge endpoint configured, cache invalidation is disabled");
    }

    let writer = TableWriter::new(table, config.write_max_attempts, Backoff::default());
    let invalidator = Invalidator::new(
        purge,
        config.environments.clone(),
        config.purge_batch_size,
        config.purge_min_interval,
    );
    let orchestrator = Arc::new(CommitOrchestrator::new(
        store.clone(),
        store.clone(),
        writer,
        invalidator,
        CommitConfig {
            chunk_size: config.chunk_size,
            chunk_concurrency: config.chunk_concurrency,
            lock_ttl: config.lock_ttl,
        },
    ));

    let executor = TaskExecutor::new(
        store.clone(),
        orchestrator,
        ExecutorConfig {
            workers: config.workers,
            poll_interval: config.poll_interval,
            max_attempts: config.task_max_attempts,
            stale_after: config.lock_ttl,
            ..Default::default()
        },
    );
    tokio::spawn(async move { executor.run().await });

    // Build router with all API endpoints
    let state = api::AppState {
        publishes: store.clone(),
        ledger: store,
        environments: Arc::new(
            config
                .environments
                .iter()
                .map(|env| env.name.clone())
                .collect(),
        ),
        default_task_deadline: config.task_deadline,
    };
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
