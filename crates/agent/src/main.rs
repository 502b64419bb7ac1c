//! Protect Agent - container abuse detection daemon
//!
//! This binary runs on a game-server node, scanning every container volume
//! and its runtime state against the loaded strategies, and suspending
//! abusive servers through the panel.

use anyhow::{Context, Result};
use protect_agent::{api, config};
use protect_lib::{
    check::CheckExecutor,
    dispatch::{Dispatcher, PterodactylClient, WebhookNotifier},
    evaluator::StrategyEvaluator,
    health::HealthRegistry,
    ledger::FlagLedger,
    observability::{ProtectMetrics, StructuredLogger},
    scan::{ScanCoordinator, ScanLoop},
    snapshot::DockerSnapshotProvider,
    strategy::{StrategyStore, StrategyWatcher},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting protect-agent");

    let config = config::AgentConfig::load()?;
    info!(node_name = %config.node_name, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = ProtectMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let store = Arc::new(StrategyStore::new(&config.strategies_dir));
    let ledger = Arc::new(FlagLedger::open_with_logger(&config.ledger_path, logger.clone()));
    metrics.set_ledger_available(ledger.is_available());
    metrics.set_flagged_containers(ledger.len() as i64);
    health_registry
        .observe_ledger(ledger.is_available(), ledger.last_error())
        .await;

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        ledger.clone(),
        store.clone(),
        logger.clone(),
    ));
    app_state.reload_strategies().await;

    let panel = Arc::new(
        PterodactylClient::new(&config.panel_url, config.panel_api_key.clone())
            .context("Failed to create panel client")?,
    );
    let notifier = Arc::new(
        WebhookNotifier::new(
            config.public_webhook_url.clone(),
            config.private_webhook_url.clone(),
        )
        .context("Failed to create webhook notifier")?,
    );
    let dispatcher = Arc::new(
        Dispatcher::new(ledger.clone(), panel, notifier)
            .with_logger(logger.clone())
            .with_retry(config.retry_policy())
            .with_suspended_policy(config.suspended_policy),
    );
    let provider = Arc::new(DockerSnapshotProvider::connect(
        &config.volumes_dir,
        config.log_tail_lines,
    )?);

    let coordinator = ScanCoordinator::builder()
        .store(store.clone())
        .evaluator(StrategyEvaluator::new(CheckExecutor::new(config.executor_limits())).with_logger(logger.clone()))
        .provider(provider)
        .ledger(ledger.clone())
        .dispatcher(dispatcher)
        .health(health_registry.clone())
        .logger(logger.clone())
        .config(config.scan_config())
        .build()?;

    // Watching stops when the handle is dropped at the end of main
    let _watcher = if config.watch_strategies {
        match StrategyWatcher::new(app_state.reloader.clone()).start() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Strategy directory watching disabled");
                None
            }
        }
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scan_handle = tokio::spawn(ScanLoop::new(coordinator, config.scan_interval()).run(shutdown_rx));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;
    logger.log_startup(AGENT_VERSION, store.current().len(), ledger.len());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = scan_handle.await {
        error!(error = %e, "Scan loop task failed");
    }
    info!("Shutting down");

    Ok(())
}
