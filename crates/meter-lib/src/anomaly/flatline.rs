//! Temperature flatline detection
//!
//! Keeps the trailing flatline window of temperature samples per device and
//! reports a flatline once enough samples show no meaningful change.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::config::{FlatlinePolicy, MeteringConfig};
use crate::window::SlidingWindow;

/// Upper bound on samples kept per device
const MAX_SAMPLES_PER_DEVICE: usize = 10_000;

/// Detects temperature signals that stopped changing
pub struct FlatlineDetector {
    window: Duration,
    min_samples: usize,
    policy: FlatlinePolicy,
    history: DashMap<String, SlidingWindow<(DateTime<Utc>, f64)>>,
}

impl FlatlineDetector {
    pub fn new(window: Duration, min_samples: usize, policy: FlatlinePolicy) -> Self {
        Self {
            window,
            min_samples,
            policy,
            history: DashMap::new(),
        }
    }

    pub fn from_config(config: &MeteringConfig) -> Self {
        Self::new(
            config.flatline_window(),
            config.min_flatline_samples,
            config.flatline_policy,
        )
    }

    /// Record a temperature sample and evict samples older than the window
    pub fn update(&self, device_id: &str, timestamp: DateTime<Utc>, temperature: f64) {
        self.history
            .entry(device_id.to_string())
            .or_insert_with(|| SlidingWindow::new(self.window, MAX_SAMPLES_PER_DEVICE))
            .push((timestamp, temperature));
    }

    /// Whether the retained samples describe a frozen signal
    pub fn check_flatline(&self, device_id: &str) -> bool {
        let Some(samples) = self.history.get(device_id) else {
            return false;
        };
        if samples.len() < self.min_samples.max(1) {
            return false;
        }

        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        match self.policy {
            FlatlinePolicy::ExactRounded => {
                let first = round2(values[0]);
                values.iter().all(|v| round2(*v) == first)
            }
            FlatlinePolicy::StdDevBelow { threshold } => population_std_dev(&values) < threshold,
        }
    }

    /// Number of samples currently retained for a device
    pub fn sample_count(&self, device_id: &str) -> usize {
        self.history.get(device_id).map(|h| h.len()).unwrap_or(0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn population_std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
