use std::sync::Arc;

use anyhow::Context;
use statreg_db::PgStore;
use statreg_import::{run_stuck_sweep, HttpSearchIndex, ImportServices, QueueProcessor};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::WorkerConfig;

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "statreg_worker=debug,statreg_import=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_json);
    tracing::info!(
        search_index = %config.search_index_url,
        bulk_buffer_size = config.import.bulk_buffer_size,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = statreg_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    statreg_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    statreg_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Pipeline services ---
    let store = Arc::new(PgStore::new(pool));
    let index = HttpSearchIndex::new(
        &config.search_index_url,
        &config.search_index_name,
        config.search_timeout,
    )
    .context("Failed to build search index client")?;
    let services = ImportServices {
        units: store.clone(),
        queue: store.clone(),
        log: store.clone(),
        index: Arc::new(index),
        permissions: store.clone(),
    };
    let processor = Arc::new(QueueProcessor::new(services, config.import.clone()));

    // --- Background loops ---
    let cancel = CancellationToken::new();

    let processor_handle = {
        let cancel = cancel.clone();
        let processor = Arc::clone(&processor);
        let interval = config.dequeue_interval;
        tokio::spawn(async move { processor.run(interval, cancel).await })
    };
    let sweep_handle = tokio::spawn(run_stuck_sweep(
        store,
        config.stuck_sweep_interval,
        config.import.stuck_timeout,
        cancel.clone(),
    ));
    tracing::info!("Worker started");

    // --- Shutdown ---
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, stopping background loops");
    cancel.cancel();

    if let Err(e) = processor_handle.await {
        tracing::error!(error = %e, "Queue processor task panicked");
    }
    if let Err(e) = sweep_handle.await {
        tracing::error!(error = %e, "Stuck sweep task panicked");
    }
    tracing::info!("Worker stopped");
    Ok(())
}
