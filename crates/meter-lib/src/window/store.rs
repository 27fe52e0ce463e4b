//! Per-device reading windows
//!
//! Each device owns a [`SlidingWindow`] of readings bounded by age (default
//! 24h) and count (default 10 000). The device's "now" is the timestamp of
//! its newest reading, so every statistic is computed in event time.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use super::sliding::older_by;
use super::SlidingWindow;
use crate::config::MeteringConfig;
use crate::models::{InterruptionPeriod, Metric, Reading};

/// Window and bookkeeping for one device
#[derive(Debug)]
struct DeviceWindow {
    readings: SlidingWindow<Reading>,
    /// First reading ever accepted for the device
    first_seen: DateTime<Utc>,
    /// Gaps between consecutive readings, oldest first
    interruptions: VecDeque<InterruptionPeriod>,
}

/// Result of [`WindowStore::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAdd {
    pub accepted: bool,
    pub evicted: usize,
    /// Gap closed by this reading, if it exceeded the interruption threshold
    pub interruption: Option<InterruptionPeriod>,
}

/// Sliding-window reading store keyed by device id
pub struct WindowStore {
    windows: DashMap<String, DeviceWindow>,
    window_duration: Duration,
    capacity: usize,
    interruption_gap: Option<Duration>,
}

impl WindowStore {
    /// Create a store with the given age limit and per-device capacity
    pub fn new(window_duration: Duration, capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window_duration,
            capacity,
            interruption_gap: None,
        }
    }

    /// Record gaps longer than `gap` between consecutive readings
    pub fn with_interruption_gap(mut self, gap: Option<Duration>) -> Self {
        self.interruption_gap = gap;
        self
    }

    pub fn from_config(config: &MeteringConfig) -> Self {
        Self::new(config.window_duration(), config.window_capacity)
            .with_interruption_gap(config.interruption_gap())
    }

    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }

    /// Append a reading, then evict by age and by capacity.
    pub fn add(&self, device_id: &str, reading: Reading) -> WindowAdd {
        let ts = reading.timestamp;
        let mut entry = self
            .windows
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceWindow {
                readings: SlidingWindow::new(self.window_duration, self.capacity),
                first_seen: ts,
                interruptions: VecDeque::new(),
            });
        let window = entry.value_mut();

        let previous = window.readings.latest().map(|r| r.timestamp);
        let outcome = window.readings.push(reading);
        if !outcome.accepted {
            debug!(device_id = %device_id, timestamp = %ts, "Reading older than window cutoff refused");
            return WindowAdd {
                accepted: false,
                evicted: 0,
                interruption: None,
            };
        }

        if ts < window.first_seen {
            window.first_seen = ts;
        }

        let interruption = match (previous, self.interruption_gap) {
            (Some(prev), Some(gap)) if ts > prev && ts - prev > gap => {
                let period = InterruptionPeriod {
                    start: prev,
                    end: ts,
                };
                info!(
                    device_id = %device_id,
                    start = %period.start,
                    end = %period.end,
                    gap_secs = period.duration().num_seconds(),
                    "Data interruption recorded"
                );
                window.interruptions.push_back(period);
                Some(period)
            }
            _ => None,
        };

        if let Some(cutoff) = window.readings.cutoff() {
            while let Some(front) = window.interruptions.front() {
                if front.end < cutoff {
                    window.interruptions.pop_front();
                } else {
                    break;
                }
            }
        }

        WindowAdd {
            accepted: true,
            evicted: outcome.evicted,
            interruption,
        }
    }

    /// Readings with `start <= timestamp <= end`; empty for unknown devices
    pub fn readings_in_window(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Reading> {
        self.windows
            .get(device_id)
            .map(|w| w.readings.range(start, end).cloned().collect())
            .unwrap_or_default()
    }

    /// Mean of `metric` over readings in `[now - span, now]`; `None` when
    /// that range holds no readings
    pub fn rolling_average(
        &self,
        device_id: &str,
        metric: Metric,
        span: Duration,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let window = self.windows.get(device_id)?;
        let (sum, count) = window
            .readings
            .range(older_by(now, span), now)
            .fold((0.0, 0usize), |(sum, count), r| (sum + r.metric(metric), count + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Fraction of expected readings missing from the window, in `[0, 1]`.
    ///
    /// Rounded to 4 decimals; a device with fewer than 2 readings counts as
    /// total loss.
    pub fn loss_rate(&self, device_id: &str, expected_interval_minutes: u64) -> f64 {
        let actual = self.len(device_id);
        if actual < 2 {
            return 1.0;
        }

        let window_minutes = self.window_duration.num_seconds() as f64 / 60.0;
        let expected = window_minutes / expected_interval_minutes.max(1) as f64;
        if expected <= 0.0 {
            return 0.0;
        }

        let loss = (1.0 - actual as f64 / expected).max(0.0);
        (loss * 10_000.0).round() / 10_000.0
    }

    /// True if one of the last `check_last_n` readings within `lookback` of
    /// `reading` lies less than a second away and has the same fingerprint.
    ///
    /// Read-only.
    pub fn is_duplicate(
        &self,
        device_id: &str,
        reading: &Reading,
        lookback: Duration,
        check_last_n: usize,
    ) -> bool {
        let Some(window) = self.windows.get(device_id) else {
            return false;
        };

        let cutoff = reading
            .timestamp
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let fingerprint = reading.content_fingerprint();

        let found = window
            .readings
            .iter()
            .rev()
            .take(check_last_n)
            .filter(|r| r.timestamp >= cutoff)
            .any(|r| {
                (r.timestamp - reading.timestamp).num_milliseconds().abs() < 1000
                    && r.content_fingerprint() == fingerprint
            });
        found
    }

    /// Interruption periods still inside the window
    pub fn interruptions(&self, device_id: &str) -> Vec<InterruptionPeriod> {
        self.windows
            .get(device_id)
            .map(|w| w.interruptions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest_timestamp(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.windows
            .get(device_id)
            .and_then(|w| w.readings.latest().map(|r| r.timestamp))
    }

    pub fn first_seen(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.windows.get(device_id).map(|w| w.first_seen)
    }

    /// Oldest timestamp the device's window still admits
    pub fn cutoff(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.windows.get(device_id).and_then(|w| w.readings.cutoff())
    }

    /// Whether the device has been observed for at least one full window
    pub fn covers_full_window(&self, device_id: &str) -> bool {
        self.windows
            .get(device_id)
            .and_then(|w| {
                w.readings
                    .latest()
                    .map(|newest| newest.timestamp - w.first_seen >= self.window_duration)
            })
            .unwrap_or(false)
    }

    pub fn len(&self, device_id: &str) -> usize {
        self.windows
            .get(device_id)
            .map(|w| w.readings.len())
            .unwrap_or(0)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.windows.iter().map(|e| e.key().clone()).collect()
    }

    pub fn device_count(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{reading_at, t0};

    fn store() -> WindowStore {
        WindowStore::new(Duration::hours(24), 10_000)
            .with_interruption_gap(Some(Duration::minutes(5)))
    }

    #[test]
    fn test_window_invariants_hold_after_every_add() {
        let store = WindowStore::new(Duration::hours(1), 10_000);
        for i in 0..200 {
            // irregular spacing with a few late arrivals
            let offset = i * 45 - if i % 7 == 0 { 30 } else { 0 };
            store.add("W1", reading_at("W1", t0() + Duration::seconds(offset)));

            let newest = store.latest_timestamp("W1").unwrap();
            let all = store.readings_in_window("W1", DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
            for pair in all.windows(2) {
                assert!(pair[0].timestamp <= pair[1].timestamp);
            }
            for r in &all {
                assert!(newest - r.timestamp <= Duration::hours(1));
            }
        }
    }

    #[test]
    fn test_capacity_cap() {
        let store = WindowStore::new(Duration::hours(24), 100);
        for i in 0..250 {
            store.add("W1", reading_at("W1", t0() + Duration::seconds(i)));
        }
        assert_eq!(store.len("W1"), 100);
    }

    #[test]
    fn test_readings_in_window_unknown_device() {
        let store = store();
        assert!(store
            .readings_in_window("nope", t0(), t0() + Duration::hours(1))
            .is_empty());
    }

    #[test]
    fn test_rolling_average() {
        let store = store();
        let now = t0() + Duration::minutes(2);
        assert_eq!(
            store.rolling_average("W1", Metric::WaterCut, Duration::hours(24), now),
            None
        );

        for (i, wc) in [0.30, 0.40, 0.50].iter().enumerate() {
            let mut r = reading_at("W1", t0() + Duration::minutes(i as i64));
            r.water_cut = *wc;
            store.add("W1", r);
        }

        let avg = store
            .rolling_average("W1", Metric::WaterCut, Duration::hours(24), now)
            .unwrap();
        assert!((avg - 0.40).abs() < 1e-9);

        // last minute only covers the last two readings
        let avg = store
            .rolling_average("W1", Metric::WaterCut, Duration::minutes(1), now)
            .unwrap();
        assert!((avg - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_average_is_anchored_at_now() {
        let store = store();
        for i in 0..60 {
            store.add("W1", reading_at("W1", t0() + Duration::minutes(i)));
        }

        // three days later the stored hour is outside the 24h span
        let later = t0() + Duration::days(3);
        assert_eq!(
            store.rolling_average("W1", Metric::WaterCut, Duration::hours(24), later),
            None
        );

        // an earlier `now` ignores readings after it
        let avg = store.rolling_average("W1", Metric::WaterCut, Duration::hours(24), t0());
        assert_eq!(avg, Some(reading_at("W1", t0()).water_cut));
    }

    #[test]
    fn test_rolling_average_zero_values_are_a_value() {
        let store = store();
        let mut r = reading_at("W1", t0());
        r.water_cut = 0.0;
        store.add("W1", r);
        assert_eq!(
            store.rolling_average("W1", Metric::WaterCut, Duration::hours(24), t0()),
            Some(0.0)
        );
    }

    #[test]
    fn test_loss_rate_total_for_sparse_devices() {
        let store = store();
        assert_eq!(store.loss_rate("W1", 1), 1.0);
        store.add("W1", reading_at("W1", t0()));
        assert_eq!(store.loss_rate("W1", 1), 1.0);
    }

    #[test]
    fn test_loss_rate_non_increasing() {
        let store = WindowStore::new(Duration::hours(1), 10_000);
        let mut previous = 1.0;
        for i in 0..90 {
            store.add("W1", reading_at("W1", t0() + Duration::minutes(i)));
            let rate = store.loss_rate("W1", 1);
            assert!(rate <= previous, "loss rate rose from {previous} to {rate}");
            assert!((0.0..=1.0).contains(&rate));
            previous = rate;
        }
        // a full hour at one reading per minute
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn test_loss_rate_rounding() {
        let store = WindowStore::new(Duration::hours(24), 10_000);
        for i in 0..1000 {
            store.add("W1", reading_at("W1", t0() + Duration::minutes(i)));
        }
        // 1 - 1000/1440 = 0.305555...
        assert_eq!(store.loss_rate("W1", 1), 0.3056);
    }

    #[test]
    fn test_duplicate_detection() {
        let store = store();
        let first = reading_at("W1", t0());
        assert!(!store.is_duplicate("W1", &first, Duration::minutes(5), 10));
        store.add("W1", first.clone());

        let mut echo = first.clone();
        echo.timestamp = t0() + Duration::milliseconds(400);
        echo.oil_flow += 3.0;
        assert!(store.is_duplicate("W1", &echo, Duration::minutes(5), 10));

        let mut later = first.clone();
        later.timestamp = t0() + Duration::seconds(2);
        assert!(!store.is_duplicate("W1", &later, Duration::minutes(5), 10));

        let mut changed = first;
        changed.timestamp = t0() + Duration::milliseconds(200);
        changed.pressure += 1.0;
        assert!(!store.is_duplicate("W1", &changed, Duration::minutes(5), 10));
    }

    #[test]
    fn test_duplicate_only_checks_last_n() {
        let store = store();
        store.add("W1", reading_at("W1", t0()));
        for i in 1..=10 {
            let mut r = reading_at("W1", t0() + Duration::milliseconds(i * 10));
            r.temperature += i as f64;
            store.add("W1", r);
        }
        let candidate = reading_at("W1", t0() + Duration::milliseconds(500));
        assert!(!store.is_duplicate("W1", &candidate, Duration::minutes(5), 10));
        assert!(store.is_duplicate("W1", &candidate, Duration::minutes(5), 11));
    }

    #[test]
    fn test_is_duplicate_is_pure() {
        let store = store();
        let r = reading_at("W1", t0());
        store.add("W1", r.clone());
        let before = store.readings_in_window("W1", t0(), t0());
        assert!(store.is_duplicate("W1", &r, Duration::minutes(5), 10));
        assert!(store.is_duplicate("W1", &r, Duration::minutes(5), 10));
        assert_eq!(before, store.readings_in_window("W1", t0(), t0()));
        assert_eq!(store.len("W1"), 1);
    }

    #[test]
    fn test_interruptions_recorded_and_pruned() {
        let store = WindowStore::new(Duration::hours(1), 10_000)
            .with_interruption_gap(Some(Duration::minutes(5)));
        store.add("W1", reading_at("W1", t0()));
        let add = store.add("W1", reading_at("W1", t0() + Duration::minutes(2)));
        assert_eq!(add.interruption, None);

        let add = store.add("W1", reading_at("W1", t0() + Duration::minutes(20)));
        let period = add.interruption.unwrap();
        assert_eq!(period.start, t0() + Duration::minutes(2));
        assert_eq!(period.duration(), Duration::minutes(18));
        assert_eq!(store.interruptions("W1").len(), 1);

        // two hours later the old gap has left the window, a new one is recorded
        store.add("W1", reading_at("W1", t0() + Duration::minutes(140)));
        let periods = store.interruptions("W1");
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].end, t0() + Duration::minutes(140));
    }

    #[test]
    fn test_covers_full_window() {
        let store = WindowStore::new(Duration::hours(1), 10_000);
        store.add("W1", reading_at("W1", t0()));
        assert!(!store.covers_full_window("W1"));
        store.add("W1", reading_at("W1", t0() + Duration::minutes(60)));
        assert!(store.covers_full_window("W1"));
        assert_eq!(store.first_seen("W1"), Some(t0()));
    }
}
