//! Periodic reading collection
//!
//! Polls a [`ReadingSource`] for every configured device on a fixed interval
//! and feeds the results into the [`Dispatcher`].

use super::Dispatcher;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::RawReading;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// Something that can produce the current reading of a device
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn read(&self, device_id: &str) -> Result<RawReading>;
}

/// Configuration for the collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Polling interval (default: 60 seconds)
    pub interval: Duration,
    pub devices: Vec<String>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            devices: Vec::new(),
        }
    }
}

/// Results from a collection cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionResults {
    pub ingested: usize,
    pub rejected: usize,
    pub source_errors: usize,
    pub alerts: usize,
}

/// Loop that polls every device and ingests what it reads
pub struct CollectionLoop {
    source: Arc<dyn ReadingSource>,
    dispatcher: Arc<Dispatcher>,
    config: CollectionConfig,
    health: Option<HealthRegistry>,
    status: ComponentStatus,
}

impl CollectionLoop {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        dispatcher: Arc<Dispatcher>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            source,
            dispatcher,
            config,
            health: None,
            status: ComponentStatus::Healthy,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Poll until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            devices = self.config.devices.len(),
            "Starting reading collection loop"
        );

        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let results = self.collect_all().await;
                    debug!(
                        ingested = results.ingested,
                        rejected = results.rejected,
                        source_errors = results.source_errors,
                        alerts = results.alerts,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Collection cycle complete"
                    );
                    self.report_health(&results).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reading collection loop");
                    break;
                }
            }
        }
    }

    /// Read and ingest one reading per device
    pub async fn collect_all(&self) -> CollectionResults {
        let mut results = CollectionResults::default();

        for device_id in &self.config.devices {
            let raw = match self.source.read(device_id).await {
                Ok(raw) => raw,
                Err(e) => {
                    results.source_errors += 1;
                    warn!(device_id = %device_id, error = %e, "Failed to read device");
                    continue;
                }
            };

            match self.dispatcher.ingest_raw(raw) {
                Ok(outcome) => {
                    results.ingested += 1;
                    results.alerts += outcome.alerts.len();
                }
                Err(_) => results.rejected += 1,
            }
        }

        results
    }

    async fn report_health(&mut self, results: &CollectionResults) {
        let status = if self.config.devices.is_empty() || results.source_errors == 0 {
            ComponentStatus::Healthy
        } else if results.source_errors == self.config.devices.len() {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        if status == self.status {
            return;
        }
        self.status = status;

        let Some(health) = &self.health else {
            return;
        };
        let message = format!(
            "{} of {} devices could not be read",
            results.source_errors,
            self.config.devices.len()
        );
        match status {
            ComponentStatus::Healthy => health.set_healthy(components::COLLECTOR).await,
            ComponentStatus::Degraded => health.set_degraded(components::COLLECTOR, message).await,
            ComponentStatus::Unhealthy => {
                health.set_unhealthy(components::COLLECTOR, message).await
            }
        }
    }
}

/// Builder for the collection loop
pub struct CollectionLoopBuilder {
    source: Option<Arc<dyn ReadingSource>>,
    dispatcher: Option<Arc<Dispatcher>>,
    health: Option<HealthRegistry>,
    config: CollectionConfig,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            dispatcher: None,
            health: None,
            config: CollectionConfig::default(),
        }
    }

    pub fn source(mut self, source: Arc<dyn ReadingSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn devices(mut self, devices: Vec<String>) -> Self {
        self.config.devices = devices;
        self
    }

    pub fn build(self) -> Result<CollectionLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Reading source is required"))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| anyhow::anyhow!("Dispatcher is required"))?;

        let collection = CollectionLoop::new(source, dispatcher, self.config);
        Ok(match self.health {
            Some(health) => collection.with_health(health),
            None => collection,
        })
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
