use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use worker_cluster::stats::collector::summarize;
use worker_cluster::transport::process::{ParentConnection, WorkerGroup};
use worker_cluster::transport::types::ProcessId;
use worker_cluster::{Config, CoordinationContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // stdout carries the wire protocol on workers, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match config.worker_id() {
        Some(id) => run_worker(id, config).await,
        None => run_coordinator(config).await,
    }
}

async fn run_coordinator(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        "Starting coordinator, storage root {}",
        config.storage_path.display()
    );

    // 1. Workers:
    let mut workers = WorkerGroup::spawn(&config).await?;

    // 2. Coordination services, installed before any worker message is dispatched:
    let context = CoordinationContext::new(workers.transport.clone(), &config);
    workers.start();
    let online = workers.wait_online(config.startup_timeout()).await;
    tracing::info!("{}/{} workers online", online, workers.worker_count());
    context.init_index().await?;

    // 3. Stats reporter:
    if config.stats_interval_secs > 0 {
        let stats = context.stats.clone();
        let period = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match stats.collect().await {
                    Ok(table) => summarize(&table),
                    Err(e) => tracing::warn!("Stats collection failed: {}", e),
                }
            }
        });
    }

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    context.shutdown();
    workers.shutdown().await;
    Ok(())
}

async fn run_worker(id: ProcessId, config: Config) -> anyhow::Result<()> {
    let mut connection = ParentConnection::connect(id)?;

    let context = CoordinationContext::new(connection.transport.clone(), &config);
    connection.start()?;
    context.init_index().await?;

    tokio::select! {
        _ = connection.closed() => {
            tracing::info!("Coordinator went away, worker {} exiting", id);
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    context.shutdown();
    Ok(())
}
