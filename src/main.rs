use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use seatline::config::Config;
use seatline::engine::BookingEngine;
use seatline::maintenance;
use seatline::model::Train;
use seatline::store::{JournaledStore, SystemClock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seatline=info")),
        )
        .init();

    let config = Config::from_env();
    seatline::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(JournaledStore::open(&config.wal_path())?);
    let engine = Arc::new(BookingEngine::with_store(
        store.clone(),
        Arc::new(SystemClock),
        config.engine.clone(),
    ));

    if let Some(seed) = &config.seed_file {
        let trains: Vec<Train> = serde_json::from_slice(&std::fs::read(seed)?)?;
        let report = engine.add_trains(trains).await?;
        info!(
            file = %seed.display(),
            added = report.added.len(),
            skipped = report.skipped.len(),
            "seed trains imported"
        );
    }

    info!("seatline started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  max_conflict_retries: {}", config.engine.max_conflict_retries);
    info!("  workflow_timeout: {:?}", config.engine.workflow_timeout);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(maintenance::run_compactor(store.clone(), config.compact_threshold));
    let pruner = tokio::spawn(maintenance::run_lock_pruner(engine.clone()));

    shutdown_signal().await?;
    info!("shutdown signal received");
    compactor.abort();
    pruner.abort();

    // Leave a short log behind so the next start replays quickly.
    if let Err(e) = store.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("seatline stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
