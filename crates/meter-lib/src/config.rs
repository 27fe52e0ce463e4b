//! Metering pipeline configuration
//!
//! Supplied once at construction; never reloaded while the pipeline runs.
//! Threshold fields are optional: an absent threshold disables its rule.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Criterion used to decide that the temperature signal has frozen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlatlinePolicy {
    /// Every retained value is equal after rounding to 2 decimals
    ExactRounded,
    /// Population standard deviation of the retained values is below `threshold`
    StdDevBelow { threshold: f64 },
}

impl Default for FlatlinePolicy {
    fn default() -> Self {
        FlatlinePolicy::ExactRounded
    }
}

/// Configuration of the window store, detectors, alert engine and optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Age limit of readings kept per device
    #[serde(default = "default_window_duration_secs")]
    pub window_duration_secs: u64,

    /// Hard cap on readings kept per device
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Expected sampling interval, used for the loss rate
    #[serde(default = "default_expected_interval_minutes")]
    pub expected_interval_minutes: u64,

    #[serde(default = "default_flatline_window_minutes")]
    pub flatline_window_minutes: u64,

    #[serde(default = "default_min_flatline_samples")]
    pub min_flatline_samples: usize,

    #[serde(default)]
    pub flatline_policy: FlatlinePolicy,

    /// Loss rate (fraction) above which a data-missing alert fires
    #[serde(default = "default_loss_rate_threshold")]
    pub loss_rate_threshold: Option<f64>,

    #[serde(default = "default_dp_threshold_kpa")]
    pub dp_threshold_kpa: Option<f64>,

    #[serde(default = "default_pressure_threshold_psi")]
    pub pressure_threshold_psi: Option<f64>,

    /// Gap between consecutive readings recorded as an interruption
    #[serde(default = "default_interruption_gap_minutes")]
    pub interruption_gap_minutes: Option<u64>,

    #[serde(default = "default_notification_cooldown_minutes")]
    pub notification_cooldown_minutes: u64,

    #[serde(default = "default_duplicate_lookback_minutes")]
    pub duplicate_lookback_minutes: u64,

    #[serde(default = "default_duplicate_check_last_n")]
    pub duplicate_check_last_n: usize,

    /// Absolute water-cut deviation (fraction) counted as significant
    #[serde(default = "default_water_cut_deviation_threshold")]
    pub water_cut_deviation_threshold: f64,

    #[serde(default = "default_comparison_sample_count")]
    pub comparison_sample_count: usize,

    #[serde(default = "default_optimizer_activation_delay_secs")]
    pub optimizer_activation_delay_secs: u64,

    /// Span of the rolling water-cut average reference samples are compared to
    #[serde(default = "default_reference_average_hours")]
    pub reference_average_hours: u64,

    /// Continuous zero differential pressure that disables the optimizer
    #[serde(default = "default_zero_dp_disable_hours")]
    pub zero_dp_disable_hours: Option<u64>,

    /// Silence after which the uptime sweep reports a device offline
    #[serde(default = "default_offline_threshold_minutes")]
    pub offline_threshold_minutes: u64,

    #[serde(default = "default_notification_queue_size")]
    pub notification_queue_size: usize,
}

fn default_window_duration_secs() -> u64 {
    24 * 60 * 60
}

fn default_window_capacity() -> usize {
    10_000
}

fn default_expected_interval_minutes() -> u64 {
    1
}

fn default_flatline_window_minutes() -> u64 {
    10
}

fn default_min_flatline_samples() -> usize {
    10
}

fn default_loss_rate_threshold() -> Option<f64> {
    Some(0.03)
}

fn default_dp_threshold_kpa() -> Option<f64> {
    Some(500.0)
}

fn default_pressure_threshold_psi() -> Option<f64> {
    Some(4600.0)
}

fn default_interruption_gap_minutes() -> Option<u64> {
    Some(5)
}

fn default_notification_cooldown_minutes() -> u64 {
    30
}

fn default_duplicate_lookback_minutes() -> u64 {
    5
}

fn default_duplicate_check_last_n() -> usize {
    10
}

fn default_water_cut_deviation_threshold() -> f64 {
    0.02
}

fn default_comparison_sample_count() -> usize {
    5
}

fn default_optimizer_activation_delay_secs() -> u64 {
    60
}

fn default_reference_average_hours() -> u64 {
    24
}

fn default_zero_dp_disable_hours() -> Option<u64> {
    Some(12)
}

fn default_offline_threshold_minutes() -> u64 {
    10
}

fn default_notification_queue_size() -> usize {
    1024
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            window_duration_secs: default_window_duration_secs(),
            window_capacity: default_window_capacity(),
            expected_interval_minutes: default_expected_interval_minutes(),
            flatline_window_minutes: default_flatline_window_minutes(),
            min_flatline_samples: default_min_flatline_samples(),
            flatline_policy: FlatlinePolicy::default(),
            loss_rate_threshold: default_loss_rate_threshold(),
            dp_threshold_kpa: default_dp_threshold_kpa(),
            pressure_threshold_psi: default_pressure_threshold_psi(),
            interruption_gap_minutes: default_interruption_gap_minutes(),
            notification_cooldown_minutes: default_notification_cooldown_minutes(),
            duplicate_lookback_minutes: default_duplicate_lookback_minutes(),
            duplicate_check_last_n: default_duplicate_check_last_n(),
            water_cut_deviation_threshold: default_water_cut_deviation_threshold(),
            comparison_sample_count: default_comparison_sample_count(),
            optimizer_activation_delay_secs: default_optimizer_activation_delay_secs(),
            reference_average_hours: default_reference_average_hours(),
            zero_dp_disable_hours: default_zero_dp_disable_hours(),
            offline_threshold_minutes: default_offline_threshold_minutes(),
            notification_queue_size: default_notification_queue_size(),
        }
    }
}

/// Longest span any duration setting may describe (100 years)
pub const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// `value` units of `unit_secs` seconds, clamped to [`MAX_SPAN_SECS`]
fn span(value: u64, unit_secs: u64) -> Duration {
    Duration::seconds(value.saturating_mul(unit_secs).min(MAX_SPAN_SECS) as i64)
}

fn check_span(field: &'static str, value: u64, unit_secs: u64) -> Result<(), ConfigError> {
    if value.saturating_mul(unit_secs) > MAX_SPAN_SECS {
        return Err(ConfigError::invalid(
            field,
            format!("must span at most {} seconds, got {}", MAX_SPAN_SECS, value),
        ));
    }
    Ok(())
}

impl MeteringConfig {
    pub fn window_duration(&self) -> Duration {
        span(self.window_duration_secs, 1)
    }

    pub fn flatline_window(&self) -> Duration {
        span(self.flatline_window_minutes, MINUTE)
    }

    pub fn interruption_gap(&self) -> Option<Duration> {
        self.interruption_gap_minutes.map(|m| span(m, MINUTE))
    }

    pub fn notification_cooldown(&self) -> Duration {
        span(self.notification_cooldown_minutes, MINUTE)
    }

    pub fn duplicate_lookback(&self) -> Duration {
        span(self.duplicate_lookback_minutes, MINUTE)
    }

    pub fn optimizer_activation_delay(&self) -> Duration {
        span(self.optimizer_activation_delay_secs, 1)
    }

    pub fn reference_average_span(&self) -> Duration {
        span(self.reference_average_hours, HOUR)
    }

    pub fn zero_dp_disable_after(&self) -> Option<Duration> {
        self.zero_dp_disable_hours.map(|h| span(h, HOUR))
    }

    pub fn offline_threshold(&self) -> Duration {
        span(self.offline_threshold_minutes, MINUTE)
    }

    /// Reject settings the pipeline cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration_secs == 0 {
            return Err(ConfigError::invalid("window_duration_secs", "must be > 0"));
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::invalid("window_capacity", "must be > 0"));
        }
        if self.expected_interval_minutes == 0 {
            return Err(ConfigError::invalid(
                "expected_interval_minutes",
                "must be > 0",
            ));
        }
        if self.flatline_window_minutes == 0 {
            return Err(ConfigError::invalid("flatline_window_minutes", "must be > 0"));
        }
        if self.comparison_sample_count == 0 {
            return Err(ConfigError::invalid("comparison_sample_count", "must be > 0"));
        }
        if self.notification_queue_size == 0 {
            return Err(ConfigError::invalid("notification_queue_size", "must be > 0"));
        }

        check_span("window_duration_secs", self.window_duration_secs, 1)?;
        check_span("expected_interval_minutes", self.expected_interval_minutes, MINUTE)?;
        check_span("flatline_window_minutes", self.flatline_window_minutes, MINUTE)?;
        if let Some(minutes) = self.interruption_gap_minutes {
            check_span("interruption_gap_minutes", minutes, MINUTE)?;
        }
        check_span(
            "notification_cooldown_minutes",
            self.notification_cooldown_minutes,
            MINUTE,
        )?;
        check_span("duplicate_lookback_minutes", self.duplicate_lookback_minutes, MINUTE)?;
        check_span(
            "optimizer_activation_delay_secs",
            self.optimizer_activation_delay_secs,
            1,
        )?;
        check_span("reference_average_hours", self.reference_average_hours, HOUR)?;
        if let Some(hours) = self.zero_dp_disable_hours {
            check_span("zero_dp_disable_hours", hours, HOUR)?;
        }
        check_span("offline_threshold_minutes", self.offline_threshold_minutes, MINUTE)?;

        if !(self.water_cut_deviation_threshold.is_finite()
            && self.water_cut_deviation_threshold >= 0.0)
        {
            return Err(ConfigError::invalid(
                "water_cut_deviation_threshold",
                format!(
                    "must be a non-negative fraction, got {}",
                    self.water_cut_deviation_threshold
                ),
            ));
        }
        if let FlatlinePolicy::StdDevBelow { threshold } = self.flatline_policy {
            if !(threshold.is_finite() && threshold > 0.0) {
                return Err(ConfigError::invalid(
                    "flatline_policy.threshold",
                    format!("must be > 0, got {}", threshold),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeteringConfig::default();
        assert_eq!(config.window_duration(), Duration::hours(24));
        assert_eq!(config.window_capacity, 10_000);
        assert_eq!(config.loss_rate_threshold, Some(0.03));
        assert_eq!(config.dp_threshold_kpa, Some(500.0));
        assert_eq!(config.pressure_threshold_psi, Some(4600.0));
        assert_eq!(config.notification_cooldown(), Duration::minutes(30));
        assert_eq!(config.comparison_sample_count, 5);
        assert_eq!(config.optimizer_activation_delay(), Duration::minutes(1));
        assert_eq!(config.flatline_policy, FlatlinePolicy::ExactRounded);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MeteringConfig = serde_json::from_str(
            r#"{
                "dp_threshold_kpa": 450.0,
                "pressure_threshold_psi": null,
                "flatline_policy": { "mode": "std_dev_below", "threshold": 0.1 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.dp_threshold_kpa, Some(450.0));
        assert_eq!(config.pressure_threshold_psi, None);
        assert_eq!(
            config.flatline_policy,
            FlatlinePolicy::StdDevBelow { threshold: 0.1 }
        );
        assert_eq!(config.window_capacity, 10_000);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = MeteringConfig {
            window_duration_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "window_duration_secs", .. })
        ));

        let config = MeteringConfig {
            flatline_policy: FlatlinePolicy::StdDevBelow { threshold: 0.0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_spans() {
        let config = MeteringConfig {
            reference_average_hours: 1_000_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "reference_average_hours", .. })
        ));

        let config = MeteringConfig {
            window_duration_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "window_duration_secs", .. })
        ));

        let config = MeteringConfig {
            zero_dp_disable_hours: Some(u64::MAX),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "zero_dp_disable_hours", .. })
        ));

        let config = MeteringConfig {
            offline_threshold_minutes: MAX_SPAN_SECS / 60,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_spans_clamp_instead_of_panicking() {
        let config = MeteringConfig {
            reference_average_hours: u64::MAX,
            optimizer_activation_delay_secs: u64::MAX,
            ..Default::default()
        };
        let max = Duration::seconds(MAX_SPAN_SECS as i64);
        assert_eq!(config.reference_average_span(), max);
        assert_eq!(config.optimizer_activation_delay(), max);
    }
}
