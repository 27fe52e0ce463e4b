//! Observability infrastructure for the metering pipeline
//!
//! Provides:
//! - Prometheus metrics (ingest latency, rejected readings, alerts, notifications)
//! - Structured logging of pipeline events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::{Alert, Severity};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MeterMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct MeterMetricsInner {
    ingest_latency_seconds: Histogram,
    readings_ingested: IntCounter,
    readings_rejected: IntCounterVec,
    alerts_raised: IntCounterVec,
    alerts_suppressed: IntCounterVec,
    notification_failures: IntCounter,
    persistence_failures: IntCounter,
    reference_samples: IntCounterVec,
    devices_tracked: IntGauge,
    optimizers_enabled: IntGauge,
}

impl MeterMetricsInner {
    fn new() -> Self {
        Self {
            ingest_latency_seconds: register_histogram!(
                "well_meter_ingest_latency_seconds",
                "Time spent running one reading through the pipeline",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register ingest_latency_seconds"),

            readings_ingested: register_int_counter!(
                "well_meter_readings_ingested_total",
                "Readings accepted by the pipeline"
            )
            .expect("Failed to register readings_ingested"),

            readings_rejected: register_int_counter_vec!(
                "well_meter_readings_rejected_total",
                "Readings refused at the pipeline boundary",
                &["reason"]
            )
            .expect("Failed to register readings_rejected"),

            alerts_raised: register_int_counter_vec!(
                "well_meter_alerts_raised_total",
                "Alerts raised by rule",
                &["rule"]
            )
            .expect("Failed to register alerts_raised"),

            alerts_suppressed: register_int_counter_vec!(
                "well_meter_alerts_suppressed_total",
                "Alerts whose notification was silenced by the cooldown",
                &["rule"]
            )
            .expect("Failed to register alerts_suppressed"),

            notification_failures: register_int_counter!(
                "well_meter_notification_failures_total",
                "Alerts that could not be queued or delivered"
            )
            .expect("Failed to register notification_failures"),

            persistence_failures: register_int_counter!(
                "well_meter_persistence_failures_total",
                "Records the persistence sink refused"
            )
            .expect("Failed to register persistence_failures"),

            reference_samples: register_int_counter_vec!(
                "well_meter_reference_samples_total",
                "Reference water-cut samples by outcome",
                &["outcome"]
            )
            .expect("Failed to register reference_samples"),

            devices_tracked: register_int_gauge!(
                "well_meter_devices_tracked",
                "Devices with a reading window"
            )
            .expect("Failed to register devices_tracked"),

            optimizers_enabled: register_int_gauge!(
                "well_meter_optimizers_enabled",
                "Devices whose water-cut optimizer is enabled"
            )
            .expect("Failed to register optimizers_enabled"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MeterMetrics {
    _private: (),
}

impl Default for MeterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MeterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MeterMetricsInner {
        GLOBAL_METRICS.get_or_init(MeterMetricsInner::new)
    }

    pub fn observe_ingest_latency(&self, duration_secs: f64) {
        self.inner().ingest_latency_seconds.observe(duration_secs);
    }

    pub fn inc_readings_ingested(&self) {
        self.inner().readings_ingested.inc();
    }

    pub fn inc_readings_rejected(&self, reason: &str) {
        self.inner()
            .readings_rejected
            .with_label_values(&[reason])
            .inc();
    }

    /// Count an alert, and its suppression if it was silenced
    pub fn record_alert(&self, alert: &Alert) {
        let rule = alert.rule_kind.as_str();
        self.inner().alerts_raised.with_label_values(&[rule]).inc();
        if !alert.should_notify {
            self.inner().alerts_suppressed.with_label_values(&[rule]).inc();
        }
    }

    pub fn inc_notification_failures(&self) {
        self.inner().notification_failures.inc();
    }

    pub fn inc_persistence_failures(&self) {
        self.inner().persistence_failures.inc();
    }

    pub fn inc_reference_samples(&self, outcome: &str) {
        self.inner()
            .reference_samples
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_devices_tracked(&self, count: i64) {
        self.inner().devices_tracked.set(count);
    }

    pub fn set_optimizers_enabled(&self, count: i64) {
        self.inner().optimizers_enabled.set(count);
    }
}

/// Structured logger for pipeline events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log a reading refused at the pipeline boundary
    pub fn log_reading_rejected(&self, device_id: &str, reason: &str, details: &str) {
        warn!(
            event = "reading_rejected",
            node = %self.node_name,
            device_id = %device_id,
            reason = %reason,
            details = %details,
            "Reading rejected"
        );
    }

    /// Log a raised alert
    pub fn log_alert(&self, alert: &Alert) {
        match alert.severity {
            Severity::Critical => {
                warn!(
                    event = "alert_raised",
                    node = %self.node_name,
                    alert_id = %alert.id,
                    device_id = %alert.device_id,
                    rule = %alert.rule_kind,
                    severity = %alert.severity,
                    should_notify = alert.should_notify,
                    message = %alert.message,
                    "Critical alert raised"
                );
            }
            Severity::Warning => {
                info!(
                    event = "alert_raised",
                    node = %self.node_name,
                    alert_id = %alert.id,
                    device_id = %alert.device_id,
                    rule = %alert.rule_kind,
                    severity = %alert.severity,
                    should_notify = alert.should_notify,
                    message = %alert.message,
                    "Alert raised"
                );
            }
        }
    }

    /// Log an alert that could not be handed to, or delivered by, the notifier
    pub fn log_notification_failed(&self, alert: &Alert, error: &str) {
        warn!(
            event = "notification_failed",
            node = %self.node_name,
            alert_id = %alert.id,
            device_id = %alert.device_id,
            rule = %alert.rule_kind,
            error = %error,
            "Alert notification failed"
        );
    }

    /// Log a reference sample dropped for lack of a rolling average
    pub fn log_reference_dropped(&self, device_id: &str, sample_average: f64) {
        warn!(
            event = "reference_dropped",
            node = %self.node_name,
            device_id = %device_id,
            sample_average = sample_average,
            "No rolling water-cut average, reference sample dropped"
        );
    }

    pub fn log_optimizer_activated(&self, device_id: &str, bias: Option<f64>, manual: bool) {
        info!(
            event = "optimizer_activated",
            node = %self.node_name,
            device_id = %device_id,
            bias = ?bias,
            manual = manual,
            "Water-cut optimizer enabled"
        );
    }

    pub fn log_optimizer_disabled(&self, device_id: &str, reason: &str) {
        info!(
            event = "optimizer_disabled",
            node = %self.node_name,
            device_id = %device_id,
            reason = %reason,
            "Water-cut optimizer disabled"
        );
    }

    pub fn log_optimizer_reset(&self, device_id: &str) {
        info!(
            event = "optimizer_reset",
            node = %self.node_name,
            device_id = %device_id,
            "Water-cut correction reset"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, devices: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            devices = devices,
            "Metering agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Metering agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::RuleKind;
    use crate::models::fixtures::t0;

    #[test]
    fn test_metrics_handles_share_registry() {
        let a = MeterMetrics::new();
        let b = a.clone();
        a.inc_readings_ingested();
        b.inc_readings_rejected("stale");
        b.set_devices_tracked(3);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "well_meter_readings_ingested_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "well_meter_readings_rejected_total"));
    }

    #[test]
    fn test_record_alert_counts_suppressed() {
        let metrics = MeterMetrics::new();
        let mut alert = Alert::new(
            RuleKind::DuplicateData,
            Severity::Warning,
            "metrics-test",
            "dup".to_string(),
            t0(),
        );
        alert.should_notify = false;

        let before = metrics
            .inner()
            .alerts_suppressed
            .with_label_values(&["duplicate_data"])
            .get();
        metrics.record_alert(&alert);
        let after = metrics
            .inner()
            .alerts_suppressed
            .with_label_values(&["duplicate_data"])
            .get();
        assert!(after > before);
    }

    #[test]
    fn test_structured_logger_events() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
        logger.log_reading_rejected("W1", "stale", "too old");
        logger.log_reference_dropped("W1", 0.3);
        logger.log_optimizer_activated("W1", Some(0.01), false);
        logger.log_optimizer_disabled("W1", "manual");
        logger.log_startup("0.1.0", 2);
        logger.log_shutdown("test");
    }
}
