//! Alert rule table
//!
//! Rules are plain data: a kind, a severity and a predicate that returns the
//! alert message when the rule fires. Evaluation order is table order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MeteringConfig;
use crate::models::{InterruptionPeriod, Reading};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Alert rule classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    DuplicateData,
    DataMissing,
    DpThreshold,
    PressureThreshold,
    TemperatureFlatline,
    DataInterruption,
    DeviceOffline,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::DuplicateData => "duplicate_data",
            RuleKind::DataMissing => "data_missing",
            RuleKind::DpThreshold => "dp_threshold",
            RuleKind::PressureThreshold => "pressure_threshold",
            RuleKind::TemperatureFlatline => "temperature_flatline",
            RuleKind::DataInterruption => "data_interruption",
            RuleKind::DeviceOffline => "device_offline",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert raised for one device by one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `ruleKind_deviceId_timestampMillis`
    pub id: String,
    pub device_id: String,
    pub rule_kind: RuleKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set by the cooldown step; false while the (device, rule) pair is silenced
    pub should_notify: bool,
}

impl Alert {
    pub fn new(
        rule_kind: RuleKind,
        severity: Severity,
        device_id: &str,
        message: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!(
                "{}_{}_{}",
                rule_kind,
                device_id,
                timestamp.timestamp_millis()
            ),
            device_id: device_id.to_string(),
            rule_kind,
            severity,
            message,
            timestamp,
            should_notify: true,
        }
    }
}

/// Everything the rule predicates look at for one reading
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub reading: &'a Reading,
    pub duplicate: bool,
    /// `None` while the device has not been observed for a full window
    pub loss_rate: Option<f64>,
    pub flatline: bool,
    /// Gap closed by this reading
    pub interruption: Option<InterruptionPeriod>,
}

/// Numeric thresholds; an absent or non-finite value disables its rule
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RuleThresholds {
    pub loss_rate: Option<f64>,
    pub dp_kpa: Option<f64>,
    pub pressure_psi: Option<f64>,
}

impl RuleThresholds {
    pub fn from_config(config: &MeteringConfig) -> Self {
        Self {
            loss_rate: config.loss_rate_threshold,
            dp_kpa: config.dp_threshold_kpa,
            pressure_psi: config.pressure_threshold_psi,
        }
    }
}

fn active(threshold: Option<f64>) -> Option<f64> {
    threshold.filter(|t| t.is_finite())
}

type Predicate = fn(&RuleInput<'_>, &RuleThresholds) -> Option<String>;

/// One row of the rule table
pub struct RuleDefinition {
    pub kind: RuleKind,
    pub severity: Severity,
    check: Predicate,
}

impl RuleDefinition {
    /// Message for the alert if the rule fires
    pub fn check(&self, input: &RuleInput<'_>, thresholds: &RuleThresholds) -> Option<String> {
        (self.check)(input, thresholds)
    }
}

/// Per-reading rules in evaluation order
pub static RULES: [RuleDefinition; 6] = [
    RuleDefinition {
        kind: RuleKind::DuplicateData,
        severity: Severity::Warning,
        check: duplicate_data,
    },
    RuleDefinition {
        kind: RuleKind::DataMissing,
        severity: Severity::Warning,
        check: data_missing,
    },
    RuleDefinition {
        kind: RuleKind::DpThreshold,
        severity: Severity::Critical,
        check: dp_threshold,
    },
    RuleDefinition {
        kind: RuleKind::PressureThreshold,
        severity: Severity::Critical,
        check: pressure_threshold,
    },
    RuleDefinition {
        kind: RuleKind::TemperatureFlatline,
        severity: Severity::Warning,
        check: temperature_flatline,
    },
    RuleDefinition {
        kind: RuleKind::DataInterruption,
        severity: Severity::Warning,
        check: data_interruption,
    },
];

fn duplicate_data(input: &RuleInput<'_>, _: &RuleThresholds) -> Option<String> {
    input.duplicate.then(|| {
        format!(
            "device {} sent a duplicate reading at {}",
            input.reading.device_id, input.reading.timestamp
        )
    })
}

fn data_missing(input: &RuleInput<'_>, thresholds: &RuleThresholds) -> Option<String> {
    let threshold = active(thresholds.loss_rate)?;
    let loss_rate = input.loss_rate?;
    (loss_rate > threshold).then(|| {
        format!(
            "device {} data loss rate {:.1}% exceeds {:.1}%",
            input.reading.device_id,
            loss_rate * 100.0,
            threshold * 100.0
        )
    })
}

fn dp_threshold(input: &RuleInput<'_>, thresholds: &RuleThresholds) -> Option<String> {
    let threshold = active(thresholds.dp_kpa)?;
    let dp = input.reading.differential_pressure;
    (dp > threshold).then(|| {
        format!(
            "device {} differential pressure {:.1} kPa exceeds {:.1} kPa",
            input.reading.device_id, dp, threshold
        )
    })
}

fn pressure_threshold(input: &RuleInput<'_>, thresholds: &RuleThresholds) -> Option<String> {
    let threshold = active(thresholds.pressure_psi)?;
    let pressure = input.reading.pressure;
    (pressure > threshold).then(|| {
        format!(
            "device {} pressure {:.1} psi exceeds {:.1} psi",
            input.reading.device_id, pressure, threshold
        )
    })
}

fn temperature_flatline(input: &RuleInput<'_>, _: &RuleThresholds) -> Option<String> {
    input.flatline.then(|| {
        format!(
            "device {} temperature flat at {:.2} °C",
            input.reading.device_id, input.reading.temperature
        )
    })
}

fn data_interruption(input: &RuleInput<'_>, _: &RuleThresholds) -> Option<String> {
    input.interruption.map(|period| {
        format!(
            "device {} sent no data for {} minutes (from {} to {})",
            input.reading.device_id,
            period.duration().num_minutes(),
            period.start,
            period.end
        )
    })
}

/// Run the rule table against one reading; alerts come back in table order
/// with `should_notify` still set.
pub fn evaluate_rules(input: &RuleInput<'_>, thresholds: &RuleThresholds) -> Vec<Alert> {
    RULES
        .iter()
        .filter_map(|rule| {
            rule.check(input, thresholds).map(|message| {
                Alert::new(
                    rule.kind,
                    rule.severity,
                    &input.reading.device_id,
                    message,
                    input.reading.timestamp,
                )
            })
        })
        .collect()
}
