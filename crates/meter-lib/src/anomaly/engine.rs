//! Alert engine with notification cooldown
//!
//! Runs the rule table for each reading and silences repeat notifications of
//! the same (device, rule) pair inside the cooldown. Silenced alerts are still
//! returned so they can be recorded.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::rules::{evaluate_rules, Alert, RuleInput, RuleKind, RuleThresholds, Severity};
use crate::config::MeteringConfig;

/// Default notification cooldown (30 minutes)
const DEFAULT_COOLDOWN_MINUTES: i64 = 30;

/// Rule evaluation plus per (device, rule) notification suppression
pub struct AlertEngine {
    thresholds: RuleThresholds,
    cooldown: Duration,
    /// (device id, rule) -> time of the last notified alert
    last_notified: DashMap<(String, RuleKind), DateTime<Utc>>,
}

impl AlertEngine {
    /// Create an engine with the default 30-minute cooldown
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self {
            thresholds,
            cooldown: Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
            last_notified: DashMap::new(),
        }
    }

    /// Set custom cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn from_config(config: &MeteringConfig) -> Self {
        Self::new(RuleThresholds::from_config(config)).with_cooldown(config.notification_cooldown())
    }

    /// Evaluate every rule for one reading and apply the cooldown
    pub fn evaluate(&self, input: &RuleInput<'_>) -> Vec<Alert> {
        let mut alerts = evaluate_rules(input, &self.thresholds);
        self.apply_cooldown(&mut alerts);
        alerts
    }

    /// Set `should_notify` on each alert, using its timestamp as "now".
    ///
    /// A notified alert restarts the cooldown for its pair; a silenced one
    /// leaves the state untouched.
    pub fn apply_cooldown(&self, alerts: &mut [Alert]) {
        for alert in alerts.iter_mut() {
            alert.should_notify =
                self.allow_notification(&alert.device_id, alert.rule_kind, alert.timestamp);
            if !alert.should_notify {
                debug!(
                    device_id = %alert.device_id,
                    rule = %alert.rule_kind,
                    "Alert notification suppressed by cooldown"
                );
            }
        }
    }

    fn allow_notification(&self, device_id: &str, kind: RuleKind, now: DateTime<Utc>) -> bool {
        match self.last_notified.entry((device_id.to_string(), kind)) {
            Entry::Occupied(mut last) => {
                if now - *last.get() < self.cooldown {
                    return false;
                }
                last.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Build the offline alert for a device silent since `last_seen`
    pub fn offline_alert(
        &self,
        device_id: &str,
        last_seen: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Alert {
        let mut alert = Alert::new(
            RuleKind::DeviceOffline,
            Severity::Critical,
            device_id,
            format!(
                "device {} offline, no data for {} minutes (last reading {})",
                device_id,
                (now - last_seen).num_minutes(),
                last_seen
            ),
            now,
        );
        alert.should_notify = self.allow_notification(device_id, RuleKind::DeviceOffline, now);
        alert
    }

    /// Time of the last notification for a (device, rule) pair
    pub fn last_notified(&self, device_id: &str, kind: RuleKind) -> Option<DateTime<Utc>> {
        self.last_notified
            .get(&(device_id.to_string(), kind))
            .map(|t| *t)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::from_config(&MeteringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{reading_at, t0};
    use crate::models::Reading;

    fn high_dp(ts: DateTime<Utc>) -> Reading {
        let mut r = reading_at("W1", ts);
        r.differential_pressure = 600.0;
        r
    }

    fn run(engine: &AlertEngine, reading: &Reading) -> Vec<Alert> {
        engine.evaluate(&RuleInput {
            reading,
            duplicate: false,
            loss_rate: None,
            flatline: false,
            interruption: None,
        })
    }

    #[test]
    fn test_cooldown_window() {
        let engine = AlertEngine::default();

        let first = run(&engine, &high_dp(t0()));
        assert!(first[0].should_notify);

        let second = run(&engine, &high_dp(t0() + Duration::minutes(29)));
        assert_eq!(second.len(), 1);
        assert!(!second[0].should_notify);
        assert_eq!(engine.last_notified("W1", RuleKind::DpThreshold), Some(t0()));

        let third = run(&engine, &high_dp(t0() + Duration::minutes(31)));
        assert!(third[0].should_notify);
        assert_eq!(
            engine.last_notified("W1", RuleKind::DpThreshold),
            Some(t0() + Duration::minutes(31))
        );
    }

    #[test]
    fn test_cooldown_is_per_device_and_rule() {
        let engine = AlertEngine::default();
        assert!(run(&engine, &high_dp(t0()))[0].should_notify);

        let mut other = high_dp(t0() + Duration::minutes(1));
        other.device_id = "W2".to_string();
        assert!(run(&engine, &other)[0].should_notify);

        let mut pressure = reading_at("W1", t0() + Duration::minutes(1));
        pressure.pressure = 5000.0;
        let alerts = run(&engine, &pressure);
        assert_eq!(alerts[0].rule_kind, RuleKind::PressureThreshold);
        assert!(alerts[0].should_notify);
    }

    #[test]
    fn test_offline_alert_respects_cooldown() {
        let engine = AlertEngine::default().with_cooldown(Duration::minutes(10));
        let seen = t0();

        let alert = engine.offline_alert("W1", seen, t0() + Duration::minutes(11));
        assert_eq!(alert.rule_kind, RuleKind::DeviceOffline);
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.should_notify);

        let again = engine.offline_alert("W1", seen, t0() + Duration::minutes(15));
        assert!(!again.should_notify);
    }

    #[test]
    fn test_no_state_for_unnotified_pairs() {
        let engine = AlertEngine::default();
        assert_eq!(engine.last_notified("W1", RuleKind::DuplicateData), None);
    }
}
