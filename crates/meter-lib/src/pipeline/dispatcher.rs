//! Per-reading pipeline orchestration
//!
//! `Dispatcher::ingest` is the single entry point for readings. Calls for
//! different devices run in parallel; calls for the same device are
//! serialized by a striped lock so window, flatline, cooldown and optimizer
//! state always see that device's readings one at a time.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::anomaly::{Alert, AlertEngine, FlatlineDetector, RuleInput};
use crate::clock::{Clock, SystemClock};
use crate::config::MeteringConfig;
use crate::error::{ConfigError, InputRejected, SinkError};
use crate::models::{AuditEvent, AuditEventKind, RawReading, Reading};
use crate::notify::Notifier;
use crate::observability::{MeterMetrics, StructuredLogger};
use crate::optimizer::{BiasOptimizer, OptimizerStatus, ReferenceOutcome, ZERO_DP_REASON};
use crate::sink::{NullSink, PersistenceSink};
use crate::window::WindowStore;

/// Number of per-device lock stripes
const LOCK_STRIPES: usize = 64;

/// Corrected reading plus every alert raised for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub reading: Reading,
    pub alerts: Vec<Alert>,
}

/// Wires the window store, detectors, alert engine and optimizer together
pub struct Dispatcher {
    config: MeteringConfig,
    store: Arc<WindowStore>,
    flatline: FlatlineDetector,
    engine: AlertEngine,
    optimizer: BiasOptimizer,
    persistence: Arc<dyn PersistenceSink>,
    notifier: Option<Notifier>,
    clock: Arc<dyn Clock>,
    metrics: MeterMetrics,
    logger: StructuredLogger,
    stripes: Vec<Mutex<()>>,
}

impl Dispatcher {
    /// Dispatcher with default collaborators (no persistence, no notifier)
    pub fn new(config: MeteringConfig) -> Result<Self, ConfigError> {
        DispatcherBuilder::new(config).build()
    }

    pub fn builder(config: MeteringConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Run one reading through the pipeline
    pub fn ingest(&self, reading: Reading) -> Result<IngestOutcome, InputRejected> {
        let start = Instant::now();
        let device_id = reading.device_id.clone();

        let result = self.ingest_locked(reading);
        match &result {
            Ok(_) => self.metrics.inc_readings_ingested(),
            Err(e) => self.record_rejection(&device_id, e),
        }
        self.metrics
            .observe_ingest_latency(start.elapsed().as_secs_f64());
        result
    }

    /// Convert a collector reading and run it through the pipeline
    pub fn ingest_raw(&self, raw: RawReading) -> Result<IngestOutcome, InputRejected> {
        let device_id = raw.device_id.clone();
        match Reading::try_from(raw) {
            Ok(reading) => self.ingest(reading),
            Err(e) => {
                self.record_rejection(&device_id, &e);
                Err(e)
            }
        }
    }

    fn ingest_locked(&self, reading: Reading) -> Result<IngestOutcome, InputRejected> {
        reading.validate()?;

        let device_id = reading.device_id.clone();
        let _guard = self.lock_device(&device_id);

        if let Some(cutoff) = self.store.cutoff(&device_id) {
            if reading.timestamp < cutoff {
                return Err(InputRejected::Stale {
                    device_id,
                    timestamp: reading.timestamp,
                    cutoff,
                });
            }
        }

        // Queried before the add so a reading never matches itself
        let duplicate = self.store.is_duplicate(
            &device_id,
            &reading,
            self.config.duplicate_lookback(),
            self.config.duplicate_check_last_n,
        );

        let added = self.store.add(&device_id, reading.clone());
        if !added.accepted {
            return Err(InputRejected::Stale {
                device_id: device_id.clone(),
                timestamp: reading.timestamp,
                cutoff: self.store.cutoff(&device_id).unwrap_or(reading.timestamp),
            });
        }
        self.flatline
            .update(&device_id, reading.timestamp, reading.temperature);

        let loss_rate = self
            .store
            .covers_full_window(&device_id)
            .then(|| {
                self.store
                    .loss_rate(&device_id, self.config.expected_interval_minutes)
            });

        let alerts = self.engine.evaluate(&RuleInput {
            reading: &reading,
            duplicate,
            loss_rate,
            flatline: self.flatline.check_flatline(&device_id),
            interruption: added.interruption,
        });

        if self.optimizer.observe_differential_pressure(
            &device_id,
            reading.differential_pressure,
            reading.timestamp,
        ) {
            self.logger.log_optimizer_disabled(&device_id, ZERO_DP_REASON);
            self.audit(
                reading.timestamp,
                &device_id,
                AuditEventKind::OptimizerOff,
                Some(ZERO_DP_REASON.to_string()),
            );
            self.refresh_optimizer_gauge();
        }

        let corrected = self.correct(reading);

        self.persist(self.persistence.persist_reading(&corrected));
        for alert in &alerts {
            self.emit_alert(alert);
        }
        self.metrics
            .set_devices_tracked(self.store.device_count() as i64);

        Ok(IngestOutcome {
            reading: corrected,
            alerts,
        })
    }

    /// Apply the device's water-cut bias and recompute the oil/water split
    fn correct(&self, reading: Reading) -> Reading {
        let ts = reading.timestamp;
        if self.optimizer.active_bias(&reading.device_id, ts).is_none() {
            return reading;
        }

        let water_cut = self
            .optimizer
            .apply_correction(&reading.device_id, reading.water_cut, ts);
        let (oil_flow, water_flow) = self.optimizer.calculate_flows(
            &reading.device_id,
            reading.liquid_flow,
            reading.water_cut,
            ts,
        );
        debug!(
            device_id = %reading.device_id,
            measured = reading.water_cut,
            corrected = water_cut,
            "Water cut corrected"
        );
        reading.with_water_cut(water_cut, oil_flow, water_flow)
    }

    /// Record, persist and (if allowed) queue one alert
    fn emit_alert(&self, alert: &Alert) {
        self.metrics.record_alert(alert);
        self.logger.log_alert(alert);
        self.persist(self.persistence.persist_alert(alert));

        if !alert.should_notify {
            return;
        }
        self.audit(
            alert.timestamp,
            &alert.device_id,
            AuditEventKind::AlertTriggered,
            Some(alert.id.clone()),
        );

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.enqueue(alert.clone()) {
                self.metrics.inc_notification_failures();
                self.logger.log_notification_failed(alert, &e.to_string());
            }
        }
    }

    fn audit(
        &self,
        timestamp: DateTime<Utc>,
        device_id: &str,
        kind: AuditEventKind,
        detail: Option<String>,
    ) {
        let event = AuditEvent::new(timestamp, device_id, kind, detail);
        self.persist(self.persistence.record_audit(&event));
    }

    fn persist(&self, result: Result<(), SinkError>) {
        if let Err(e) = result {
            self.metrics.inc_persistence_failures();
            warn!(error = %e, "Persistence sink failed");
        }
    }

    fn record_rejection(&self, device_id: &str, error: &InputRejected) {
        self.metrics.inc_readings_rejected(error.reason());
        self.logger
            .log_reading_rejected(device_id, error.reason(), &error.to_string());
    }

    fn refresh_optimizer_gauge(&self) {
        self.metrics
            .set_optimizers_enabled(self.optimizer.enabled_count() as i64);
    }

    fn lock_device(&self, device_id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        device_id.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a reference water-cut sample taken now
    pub fn add_reference_sample(
        &self,
        device_id: &str,
        sample_average: f64,
    ) -> Result<ReferenceOutcome, InputRejected> {
        self.add_reference_sample_at(device_id, sample_average, self.clock.now())
    }

    /// Submit a reference water-cut sample taken at `now`
    pub fn add_reference_sample_at(
        &self,
        device_id: &str,
        sample_average: f64,
        now: DateTime<Utc>,
    ) -> Result<ReferenceOutcome, InputRejected> {
        let _guard = self.lock_device(device_id);

        let outcome = match self
            .optimizer
            .add_reference_sample(device_id, sample_average, now)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.inc_reference_samples("rejected");
                warn!(device_id = %device_id, error = %e, "Reference sample rejected");
                return Err(e);
            }
        };

        match &outcome {
            ReferenceOutcome::Unavailable => {
                self.metrics.inc_reference_samples("unavailable");
                self.logger.log_reference_dropped(device_id, sample_average);
            }
            ReferenceOutcome::Recorded(record) => {
                self.metrics.inc_reference_samples("recorded");
                self.audit(
                    now,
                    device_id,
                    AuditEventKind::SampleInput,
                    Some(format!("{:.4}", record.sample_average)),
                );
                self.audit(
                    now,
                    device_id,
                    AuditEventKind::DeviationCalc,
                    Some(format!(
                        "rolling={:.4} deviation={:.4}",
                        record.rolling_average, record.deviation
                    )),
                );
                if record.activated {
                    let bias = self.optimizer.status(device_id).and_then(|s| s.bias);
                    self.logger.log_optimizer_activated(device_id, bias, false);
                    self.audit(
                        now,
                        device_id,
                        AuditEventKind::OptimizerOn,
                        bias.map(|b| format!("bias={:.4}", b)),
                    );
                    self.refresh_optimizer_gauge();
                }
            }
        }
        Ok(outcome)
    }

    /// Manually enable a device's optimizer; false if it already was
    pub fn enable_optimizer(&self, device_id: &str) -> bool {
        let _guard = self.lock_device(device_id);
        let changed = self.optimizer.enable(device_id);
        if changed {
            let bias = self.optimizer.status(device_id).and_then(|s| s.bias);
            self.logger.log_optimizer_activated(device_id, bias, true);
            self.audit(
                self.clock.now(),
                device_id,
                AuditEventKind::OptimizerOn,
                Some("manual".to_string()),
            );
            self.refresh_optimizer_gauge();
        }
        changed
    }

    /// Disable a device's optimizer; false if it already was
    pub fn disable_optimizer(&self, device_id: &str, reason: &str) -> bool {
        let _guard = self.lock_device(device_id);
        let changed = self.optimizer.disable(device_id, reason);
        if changed {
            self.logger.log_optimizer_disabled(device_id, reason);
            self.audit(
                self.clock.now(),
                device_id,
                AuditEventKind::OptimizerOff,
                Some(reason.to_string()),
            );
            self.refresh_optimizer_gauge();
        }
        changed
    }

    /// Drop a device's bias without changing its phase; false for a device
    /// without an optimizer
    pub fn reset_optimizer(&self, device_id: &str) -> bool {
        let _guard = self.lock_device(device_id);
        let known = self.optimizer.reset_correction(device_id);
        if known {
            self.logger.log_optimizer_reset(device_id);
            self.audit(
                self.clock.now(),
                device_id,
                AuditEventKind::OptimizerReset,
                None,
            );
        }
        known
    }

    pub fn enable_all_optimizers(&self) -> Vec<String> {
        self.optimizer
            .device_ids()
            .into_iter()
            .filter(|id| self.enable_optimizer(id))
            .collect()
    }

    pub fn disable_all_optimizers(&self, reason: &str) -> Vec<String> {
        self.optimizer
            .device_ids()
            .into_iter()
            .filter(|id| self.disable_optimizer(id, reason))
            .collect()
    }

    pub fn optimizer_status(&self, device_id: &str) -> Option<OptimizerStatus> {
        self.optimizer.status(device_id)
    }

    /// Devices with optimizer state, including ones that never sent a reading
    pub fn optimizer_device_ids(&self) -> Vec<String> {
        self.optimizer.device_ids()
    }

    /// Raise an offline alert for every device silent longer than the
    /// offline threshold at `now`
    pub fn check_uptime(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let threshold = self.config.offline_threshold();
        let mut alerts = Vec::new();

        for device_id in self.store.device_ids() {
            let _guard = self.lock_device(&device_id);
            let Some(last_seen) = self.store.latest_timestamp(&device_id) else {
                continue;
            };
            if now - last_seen <= threshold {
                continue;
            }

            let alert = self.engine.offline_alert(&device_id, last_seen, now);
            self.emit_alert(&alert);
            alerts.push(alert);
        }
        alerts
    }

    /// [`check_uptime`](Self::check_uptime) against the dispatcher's clock
    pub fn check_uptime_now(&self) -> Vec<Alert> {
        self.check_uptime(self.clock.now())
    }

    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }
}

/// Builder for a [`Dispatcher`]
pub struct DispatcherBuilder {
    config: MeteringConfig,
    persistence: Arc<dyn PersistenceSink>,
    notifier: Option<Notifier>,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
}

impl DispatcherBuilder {
    pub fn new(config: MeteringConfig) -> Self {
        Self {
            config,
            persistence: Arc::new(NullSink),
            notifier: None,
            clock: Arc::new(SystemClock),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = sink;
        self
    }

    /// Queue notified alerts on this notifier
    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Validate the configuration and build the dispatcher
    pub fn build(self) -> Result<Dispatcher, ConfigError> {
        self.config.validate()?;

        let store = Arc::new(WindowStore::from_config(&self.config));
        let optimizer = BiasOptimizer::new(store.clone(), &self.config);

        Ok(Dispatcher {
            flatline: FlatlineDetector::from_config(&self.config),
            engine: AlertEngine::from_config(&self.config),
            optimizer,
            store,
            persistence: self.persistence,
            notifier: self.notifier,
            clock: self.clock,
            metrics: MeterMetrics::new(),
            logger: self.logger,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            config: self.config,
        })
    }
}
