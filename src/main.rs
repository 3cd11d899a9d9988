use anyhow::Result;
use arb_dashboard::{
    config::Config,
    console::ConsoleManager,
    engine::{self, SnapshotAggregator},
    tests::EndpointProber,
    utils::{http::ResourceClient, store::SnapshotStore},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never interleave with the dashboard on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting arbitrage dashboard");

    let config = Config::load()?;
    info!(
        "Configuration loaded (backend: {}, interval: {:?})",
        config.api.base_url,
        config.poll_interval()
    );

    let console_manager = Arc::new(ConsoleManager::new(config.display.clone(), config.api.base_url.clone()));
    let client = Arc::new(ResourceClient::new(&config.api)?);

    let prober = EndpointProber::new(client.clone(), console_manager.clone());
    let results = prober.probe_all().await;
    if results.iter().all(|r| !r.success) {
        warn!("Backend is unreachable at {}; polling anyway", client.base_url());
    }

    let store = SnapshotStore::new(config.polling.failure_policy);
    let shutdown = CancellationToken::new();

    let console_handle = tokio::spawn(console_manager.clone().run(store.watch(), shutdown.clone()));

    let _log_subscription = store.subscribe(
        |snapshot| {
            info!(
                "Snapshot {} published: {} opportunities, bot running: {}",
                snapshot.cycle,
                snapshot.opportunities.len(),
                snapshot.status.running
            )
        },
        |e| warn!("Showing last known data after failed update: {}", e),
    );

    let aggregator = Arc::new(SnapshotAggregator::new(client));
    let poller = engine::start_sync(aggregator, config.poll_interval(), store.clone())?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    let stats = poller.stats();
    poller.join().await;
    shutdown.cancel();

    if let Err(e) = console_handle.await {
        error!("Console task failed: {}", e);
    }

    info!(
        "Stopped after {} cycles ({} succeeded, {} failed, {} ticks skipped)",
        stats.cycles_started, stats.cycles_succeeded, stats.cycles_failed, stats.ticks_skipped
    );
    Ok(())
}
