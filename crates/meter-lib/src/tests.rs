//! Pipeline scenarios across the window store, alert engine and optimizer
//!
//! Each scenario drives a full `Dispatcher` with event-time readings and
//! checks what comes out of `ingest` and what reaches the collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::broadcast;

use crate::anomaly::{Alert, RuleKind, Severity};
use crate::config::MeteringConfig;
use crate::error::NotifyError;
use crate::models::fixtures::{reading_at, t0};
use crate::models::{AuditEventKind, Reading};
use crate::notify::{NotificationSink, NotificationWorker};
use crate::optimizer::{OptimizerPhase, ZERO_DP_REASON};
use crate::pipeline::Dispatcher;
use crate::sink::MemorySink;

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

fn kinds(alerts: &[Alert]) -> Vec<RuleKind> {
    alerts.iter().map(|a| a.rule_kind).collect()
}

/// Reading whose temperature drifts so the flatline rule stays quiet
fn drifting(device: &str, minute: i64) -> Reading {
    let mut r = reading_at(device, t0() + Duration::minutes(minute));
    r.temperature = 60.0 + minute as f64 * 0.1;
    r
}

mod threshold_and_duplicate {
    use super::*;

    #[test]
    fn test_high_dp_then_duplicate() {
        let sink = Arc::new(MemorySink::new());
        let d = Dispatcher::builder(MeteringConfig::default())
            .persistence(sink.clone())
            .build()
            .unwrap();

        let mut first = reading_at("W1", t0());
        first.differential_pressure = 600.0;
        let outcome = d.ingest(first.clone()).unwrap();

        assert_eq!(outcome.alerts.len(), 1);
        let alert = &outcome.alerts[0];
        assert_eq!(alert.rule_kind, RuleKind::DpThreshold);
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.should_notify);

        let mut echo = first.clone();
        echo.timestamp = t0() + Duration::milliseconds(300);
        let outcome = d.ingest(echo).unwrap();

        assert_eq!(
            kinds(&outcome.alerts),
            vec![RuleKind::DuplicateData, RuleKind::DpThreshold]
        );
        assert!(outcome.alerts[0].should_notify);
        assert!(!outcome.alerts[1].should_notify);

        // every alert is recorded, notified or not
        assert_eq!(sink.alerts().len(), 3);
        assert_eq!(sink.readings().len(), 2);
        let triggered = sink
            .audit_events()
            .iter()
            .filter(|e| e.kind == AuditEventKind::AlertTriggered)
            .count();
        assert_eq!(triggered, 2);
    }

    #[test]
    fn test_pressure_alert_after_cooldown() {
        let d = Dispatcher::new(MeteringConfig::default()).unwrap();
        let mut notified = Vec::new();

        for minute in [0, 10, 20, 31, 40] {
            let mut r = drifting("W1", minute);
            r.pressure = 4700.0;
            let outcome = d.ingest(r).unwrap();
            let alert = outcome
                .alerts
                .iter()
                .find(|a| a.rule_kind == RuleKind::PressureThreshold)
                .unwrap();
            notified.push(alert.should_notify);
        }

        assert_eq!(notified, vec![true, false, false, true, false]);
    }
}

mod window_rules {
    use super::*;

    #[test]
    fn test_loss_rate_alert_waits_for_full_window() {
        let config = MeteringConfig {
            window_duration_secs: 3600,
            ..Default::default()
        };
        let d = Dispatcher::new(config).unwrap();

        // one reading every two minutes: half the expected rate
        for minute in (0..60).step_by(2) {
            let outcome = d.ingest(drifting("W1", minute)).unwrap();
            assert!(
                !kinds(&outcome.alerts).contains(&RuleKind::DataMissing),
                "loss alert before a full window at minute {minute}"
            );
        }

        let outcome = d.ingest(drifting("W1", 60)).unwrap();
        assert_eq!(kinds(&outcome.alerts), vec![RuleKind::DataMissing]);
        assert!(outcome.alerts[0].message.contains("48.3%"));
    }

    #[test]
    fn test_temperature_flatline() {
        let d = Dispatcher::new(MeteringConfig::default()).unwrap();

        for minute in 0..9 {
            let outcome = d.ingest(reading_at("W1", t0() + Duration::minutes(minute))).unwrap();
            assert!(outcome.alerts.is_empty());
        }

        let outcome = d.ingest(reading_at("W1", t0() + Duration::minutes(9))).unwrap();
        assert_eq!(kinds(&outcome.alerts), vec![RuleKind::TemperatureFlatline]);
        assert_eq!(outcome.alerts[0].severity, Severity::Warning);
    }

    #[test]
    fn test_data_interruption() {
        let d = Dispatcher::new(MeteringConfig::default()).unwrap();
        d.ingest(drifting("W1", 0)).unwrap();
        d.ingest(drifting("W1", 1)).unwrap();

        let outcome = d.ingest(drifting("W1", 9)).unwrap();
        assert_eq!(kinds(&outcome.alerts), vec![RuleKind::DataInterruption]);
        assert_eq!(d.store().interruptions("W1").len(), 1);
    }

    #[test]
    fn test_devices_do_not_share_state() {
        let d = Dispatcher::new(MeteringConfig::default()).unwrap();
        let mut a = reading_at("W1", t0());
        a.differential_pressure = 600.0;
        let mut b = a.clone();
        b.device_id = "W2".to_string();

        assert!(d.ingest(a).unwrap().alerts[0].should_notify);
        let outcome = d.ingest(b).unwrap();
        assert_eq!(kinds(&outcome.alerts), vec![RuleKind::DpThreshold]);
        assert!(outcome.alerts[0].should_notify);
    }
}

mod optimizer_lifecycle {
    use super::*;

    #[test]
    fn test_zero_dp_disables_optimizer() {
        let sink = Arc::new(MemorySink::new());
        let d = Dispatcher::builder(MeteringConfig::default())
            .persistence(sink.clone())
            .build()
            .unwrap();

        d.ingest(drifting("W1", 0)).unwrap();
        assert!(d.enable_optimizer("W1"));

        for half_hour in 1..=26 {
            let mut r = drifting("W1", half_hour * 30);
            r.differential_pressure = 0.0;
            d.ingest(r).unwrap();
        }

        let status = d.optimizer_status("W1").unwrap();
        assert_eq!(status.phase, OptimizerPhase::Disabled);
        assert_eq!(status.disabled_reason.as_deref(), Some(ZERO_DP_REASON));
        assert!(sink
            .audit_events()
            .iter()
            .any(|e| e.kind == AuditEventKind::OptimizerOff
                && e.detail.as_deref() == Some(ZERO_DP_REASON)));
    }

    #[test]
    fn test_reference_samples_activate_and_correct() {
        let d = Dispatcher::new(MeteringConfig::default()).unwrap();
        for minute in 0..30 {
            d.ingest(drifting("W1", minute)).unwrap();
        }

        let at = t0() + Duration::minutes(30);
        for (i, sample) in [0.38, 0.38, 0.32, 0.38, 0.355].iter().enumerate() {
            d.add_reference_sample_at("W1", *sample, at + Duration::seconds(i as i64))
                .unwrap();
        }
        let status = d.optimizer_status("W1").unwrap();
        assert!(status.enabled);
        assert!((status.bias.unwrap() - 0.013).abs() < 1e-9);

        // activation is delayed by a minute
        let early = d.ingest(drifting("W1", 30)).unwrap();
        assert_eq!(early.reading.water_cut, 0.35);

        let late = d.ingest(drifting("W1", 32)).unwrap();
        assert!((late.reading.water_cut - 0.363).abs() < 1e-9);
        assert!((late.reading.oil_flow + late.reading.water_flow - 100.0).abs() < 1e-9);

        d.reset_optimizer("W1");
        let reset = d.ingest(drifting("W1", 33)).unwrap();
        assert_eq!(reset.reading.water_cut, 0.35);
    }
}

mod reference_span {
    use super::*;
    use crate::error::ConfigError;
    use crate::optimizer::ReferenceOutcome;

    #[test]
    fn test_stale_window_gives_no_comparison() {
        let sink = Arc::new(MemorySink::new());
        let d = Dispatcher::builder(MeteringConfig::default())
            .persistence(sink.clone())
            .build()
            .unwrap();
        for minute in 0..60 {
            d.ingest(drifting("W1", minute)).unwrap();
        }

        let later = t0() + Duration::days(3);
        assert_eq!(
            d.add_reference_sample_at("W1", 0.40, later).unwrap(),
            ReferenceOutcome::Unavailable
        );
        assert!(d.optimizer_status("W1").is_none());
        assert!(sink.audit_events().is_empty());

        // a sample inside the span still compares
        let recent = t0() + Duration::hours(2);
        assert!(matches!(
            d.add_reference_sample_at("W1", 0.40, recent).unwrap(),
            ReferenceOutcome::Recorded(_)
        ));
    }

    #[test]
    fn test_oversized_spans_are_refused_at_build() {
        let config = MeteringConfig {
            reference_average_hours: 1_000_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(
            Dispatcher::new(config),
            Err(ConfigError::Invalid { field: "reference_average_hours", .. })
        ));

        let config = MeteringConfig {
            duplicate_lookback_minutes: u64::MAX,
            ..Default::default()
        };
        assert!(Dispatcher::new(config).is_err());
    }

    #[test]
    fn test_readings_near_earliest_instant() {
        let d = Dispatcher::new(MeteringConfig::default()).unwrap();
        let earliest = chrono::DateTime::<chrono::Utc>::MIN_UTC;
        let first = reading_at("W1", earliest);
        d.ingest(first.clone()).unwrap();

        let mut next = first.clone();
        next.timestamp = earliest + Duration::minutes(1);
        let outcome = d.ingest(next).unwrap();
        assert!(!kinds(&outcome.alerts).contains(&RuleKind::DuplicateData));
        assert_eq!(d.store().len("W1"), 2);

        assert!(matches!(
            d.add_reference_sample_at("W1", 0.40, earliest + Duration::minutes(2))
                .unwrap(),
            ReferenceOutcome::Recorded(_)
        ));
    }
}

mod notification {
    use super::*;

    #[tokio::test]
    async fn test_only_notified_alerts_reach_the_sink() {
        let recorder = Arc::new(RecordingNotifier::default());
        let (notifier, worker) = NotificationWorker::channel(recorder.clone(), 16);
        let d = Dispatcher::builder(MeteringConfig::default())
            .notifier(notifier)
            .build()
            .unwrap();

        for ms in [0, 200, 400] {
            let mut r = reading_at("W1", t0() + Duration::milliseconds(ms));
            r.differential_pressure = 650.0;
            d.ingest(r).unwrap();
        }
        drop(d);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        worker.run(shutdown_rx).await;

        let delivered = recorder.alerts.lock().unwrap().clone();
        assert_eq!(
            kinds(&delivered),
            vec![RuleKind::DpThreshold, RuleKind::DuplicateData]
        );
    }

    #[tokio::test]
    async fn test_full_queue_does_not_fail_ingest() {
        let (notifier, _worker) =
            NotificationWorker::channel(Arc::new(RecordingNotifier::default()), 1);
        let d = Dispatcher::builder(MeteringConfig::default())
            .notifier(notifier)
            .build()
            .unwrap();

        let mut r = reading_at("W1", t0());
        r.differential_pressure = 600.0;
        r.pressure = 5000.0;
        let outcome = d.ingest(r).unwrap();
        assert_eq!(outcome.alerts.len(), 2);
        assert!(outcome.alerts.iter().all(|a| a.should_notify));
    }
}
