//! Alert notification delivery
//!
//! The ingest path never waits on delivery: notified alerts are pushed onto a
//! bounded queue with [`Notifier::enqueue`] and a [`NotificationWorker`] task
//! hands them to the [`NotificationSink`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::anomaly::Alert;
use crate::error::NotifyError;
use crate::health::{components, HealthRegistry};
use crate::observability::{MeterMetrics, StructuredLogger};

/// Delivers alerts to operators (mail, SMS, chat...)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Emits each alert as a structured log event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        warn!(
            event = "alert_notification",
            alert_id = %alert.id,
            device_id = %alert.device_id,
            rule = %alert.rule_kind,
            severity = %alert.severity,
            timestamp = %alert.timestamp,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// Sending half of the notification queue
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Alert>,
}

impl Notifier {
    /// Queue an alert without waiting
    pub fn enqueue(&self, alert: Alert) -> Result<(), NotifyError> {
        self.tx.try_send(alert).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

/// Drains the notification queue into a sink
pub struct NotificationWorker {
    sink: Arc<dyn NotificationSink>,
    rx: mpsc::Receiver<Alert>,
    health: Option<HealthRegistry>,
    metrics: MeterMetrics,
    logger: StructuredLogger,
    degraded: bool,
}

impl NotificationWorker {
    /// Create a queue of `queue_size` alerts and the worker draining it
    pub fn channel(sink: Arc<dyn NotificationSink>, queue_size: usize) -> (Notifier, Self) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let worker = Self {
            sink,
            rx,
            health: None,
            metrics: MeterMetrics::new(),
            logger: StructuredLogger::new("local"),
            degraded: false,
        };
        (Notifier { tx }, worker)
    }

    /// Report delivery failures to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Deliver queued alerts until shutdown or until every sender is gone.
    ///
    /// Alerts already queued at shutdown are still delivered.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting notification worker");
        let mut delivered = 0u64;

        loop {
            tokio::select! {
                next = self.rx.recv() => {
                    match next {
                        Some(alert) => {
                            if self.deliver(&alert).await {
                                delivered += 1;
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    while let Ok(alert) = self.rx.try_recv() {
                        if self.deliver(&alert).await {
                            delivered += 1;
                        }
                    }
                    break;
                }
            }
        }

        info!(delivered, "Notification worker stopped");
    }

    async fn deliver(&mut self, alert: &Alert) -> bool {
        match self.sink.notify(alert).await {
            Ok(()) => {
                debug!(alert_id = %alert.id, "Alert delivered");
                if self.degraded {
                    self.degraded = false;
                    if let Some(health) = &self.health {
                        health.set_healthy(components::NOTIFIER).await;
                    }
                }
                true
            }
            Err(e) => {
                self.metrics.inc_notification_failures();
                self.logger.log_notification_failed(alert, &e.to_string());
                self.degraded = true;
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::NOTIFIER, format!("delivery failed: {}", e))
                        .await;
                }
                false
            }
        }
    }
}
