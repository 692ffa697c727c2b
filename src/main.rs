//! Hourglass Relayer - cross-chain atomic swap coordination daemon
//!
//! Loads configuration, wires one escrow adapter per swap leg, resumes any
//! swaps interrupted by the last shutdown, and keeps the refund watcher and
//! metrics endpoint running. Intents and bids arrive through the library
//! API; this process carries no inbound wire protocol of its own.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use hourglass_relayer::adapter::sim::SimChainConfig;
use hourglass_relayer::adapter::{ChainRegistry, EscrowAdapter, RetryPolicy, SimulatedChain};
use hourglass_relayer::auction::BiddingEngine;
use hourglass_relayer::config::{ChainConfig, ChainKind, ChainRole, Settings};
use hourglass_relayer::coordination::{RefundWatcher, SwapEngine};
use hourglass_relayer::ledger::{SqliteStore, SwapLedger};
use hourglass_relayer::metrics::{self, MetricsServer};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Hourglass Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Durable store and ledger
    let store = Arc::new(
        SqliteStore::open(&settings.database.url, settings.database.max_connections).await?,
    );
    store.run_migrations().await?;
    let ledger = Arc::new(SwapLedger::new(store.clone()));
    info!("Ledger store ready");

    // One adapter per swap leg; role assignment is deployment policy
    let source_cfg = settings
        .chain_for_role(ChainRole::Source)
        .expect("validated config has a source chain");
    let dest_cfg = settings
        .chain_for_role(ChainRole::Dest)
        .expect("validated config has a dest chain");
    let source = build_adapter(source_cfg)?;
    let dest = build_adapter(dest_cfg)?;

    let registry = Arc::new(ChainRegistry::new());
    registry.register(source.clone());
    registry.register(dest.clone());
    info!(
        source = source_cfg.name.as_str(),
        dest = dest_cfg.name.as_str(),
        "chain adapters initialized"
    );

    // Coordination engine and auction book
    let engine = Arc::new(SwapEngine::new(
        ledger.clone(),
        source,
        dest,
        &settings.coordinator,
        settings.timelocks.clone(),
    ));
    let auction = Arc::new(BiddingEngine::new(
        store.clone(),
        settings.auction.clone(),
    ));

    let reloaded = auction.load_open().await?;
    info!(intents = reloaded, "auction state reloaded");

    let resumed = engine.recover().await?;
    info!(swaps = resumed, "in-flight swaps resumed");

    // Refund watcher
    let watcher = Arc::new(RefundWatcher::new(
        ledger.clone(),
        registry.clone(),
        RetryPolicy::from_config(&settings.coordinator),
        Duration::from_secs(settings.coordinator.refund_scan_interval_secs),
    ));
    let watcher_handle = tokio::spawn({
        let watcher = watcher.clone();
        async move {
            if let Err(e) = watcher.run().await {
                error!("Refund watcher error: {}", e);
            }
        }
    });

    // Metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let ledger = ledger.clone();
        let store = store.clone();
        let auction = auction.clone();
        let interval = settings.coordinator.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                if let Err(e) = store.health_check().await {
                    warn!("Store health check failed: {}", e);
                    continue;
                }
                match ledger.active().await {
                    Ok(active) => info!(
                        active_swaps = active.len(),
                        open_intents = auction.open_count(),
                        "heartbeat"
                    ),
                    Err(e) => warn!("Ledger health check failed: {}", e),
                }
                metrics::record_health_check();
            }
        }
    });

    info!("Hourglass Relayer is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    watcher.stop().await;
    watcher_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Hourglass Relayer stopped");
    Ok(())
}

/// Construct the adapter backing one chain config. External chains plug in
/// their own `EscrowAdapter` implementation out of tree; the simulated
/// backend mines its own blocks on the configured cadence.
fn build_adapter(config: &ChainConfig) -> Result<Arc<dyn EscrowAdapter>> {
    match config.kind {
        ChainKind::Simulated => {
            let interval = Duration::from_millis(config.block_interval_ms);
            let chain = Arc::new(SimulatedChain::new(SimChainConfig::new(
                config.chain_id,
                config.confirmation_depth,
                interval,
            )));
            // detached: dropping the handle leaves the miner running
            let _ = chain.spawn_miner(interval);
            Ok(chain)
        }
        ChainKind::External => anyhow::bail!(
            "chain {} is declared external but no adapter is registered",
            config.name
        ),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hourglass_relayer=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
