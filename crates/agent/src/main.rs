//! Meter Agent - well metering service
//!
//! Polls every configured well, runs the readings through the metering
//! pipeline and serves health and metrics over HTTP.

use anyhow::{Context, Result};
use meter_lib::{
    health::{components, HealthRegistry},
    observability::{MeterMetrics, StructuredLogger},
    pipeline::{CollectionLoopBuilder, Dispatcher},
    LogNotifier, NotificationWorker,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod simulator;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting meter-agent");

    let config = config::AgentConfig::load().context("Failed to load configuration")?;
    info!(
        node_name = %config.node_name,
        devices = config.devices.len(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    for component in components::ALL {
        health_registry.register(component).await;
    }

    let metrics = MeterMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let (notifier, worker) = NotificationWorker::channel(
        Arc::new(LogNotifier),
        config.metering.notification_queue_size,
    );
    let worker = worker
        .with_health(health_registry.clone())
        .with_logger(logger.clone());

    let dispatcher = Arc::new(
        Dispatcher::builder(config.metering.clone())
            .notifier(notifier)
            .logger(logger.clone())
            .build()
            .context("Failed to build metering pipeline")?,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker_handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));

    let source = Arc::new(simulator::SimulatedSource::new(
        config.devices.clone(),
        chrono::Utc::now().timestamp_millis() as u64,
    ));
    let collection = CollectionLoopBuilder::new()
        .source(source)
        .dispatcher(dispatcher.clone())
        .health(health_registry.clone())
        .interval(config.sample_interval())
        .devices(config.device_ids())
        .build()?;
    let collection_handle = tokio::spawn(collection.run(shutdown_tx.subscribe()));

    let uptime_handle = tokio::spawn(uptime_sweep(
        dispatcher.clone(),
        config.uptime_check_interval(),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        dispatcher.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;
    logger.log_startup(AGENT_VERSION, config.devices.len());

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // Receivers may already be gone if a task exited early
    let _ = shutdown_tx.send(());
    for (name, handle) in [
        ("collection", collection_handle),
        ("uptime", uptime_handle),
        ("notification", worker_handle),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Periodically raise offline alerts for silent devices
async fn uptime_sweep(
    dispatcher: Arc<Dispatcher>,
    period: std::time::Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately and no device has reported yet
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let alerts = dispatcher.check_uptime_now();
                if !alerts.is_empty() {
                    info!(offline = alerts.len(), "Uptime sweep found silent devices");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
