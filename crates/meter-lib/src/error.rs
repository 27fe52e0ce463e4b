//! Error types for the metering core

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::Metric;

/// A reading or reference sample refused at the pipeline boundary.
///
/// Rejection happens before any per-device state is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputRejected {
    #[error("reading has an empty device id")]
    EmptyDeviceId,
    #[error("device {device_id}: missing required metric {metric}")]
    MissingMetric { device_id: String, metric: Metric },
    #[error("device {device_id}: metric {metric} is not finite ({value})")]
    NonFinite {
        device_id: String,
        metric: Metric,
        value: f64,
    },
    #[error("device {device_id}: metric {metric} out of range ({value})")]
    OutOfRange {
        device_id: String,
        metric: Metric,
        value: f64,
    },
    #[error("device {device_id}: reading at {timestamp} is older than the window cutoff {cutoff}")]
    Stale {
        device_id: String,
        timestamp: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    },
}

impl InputRejected {
    /// Short label used for metrics and log fields
    pub fn reason(&self) -> &'static str {
        match self {
            InputRejected::EmptyDeviceId => "empty_device_id",
            InputRejected::MissingMetric { .. } => "missing_metric",
            InputRejected::NonFinite { .. } => "non_finite",
            InputRejected::OutOfRange { .. } => "out_of_range",
            InputRejected::Stale { .. } => "stale",
        }
    }
}

/// Failure to hand an alert to the notification sink
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification queue is full")]
    QueueFull,
    #[error("notification worker has stopped")]
    Closed,
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Failure reported by a persistence sink
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("persistence sink unavailable: {0}")]
    Unavailable(String),
    #[error("persistence sink rejected record: {0}")]
    Rejected(String),
}

/// Invalid metering configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
