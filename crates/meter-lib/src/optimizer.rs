//! Water-cut bias optimizer
//!
//! Compares laboratory reference samples with the rolling water-cut average
//! of each device. Once most of the last N deviations are significant, the
//! mean deviation becomes an additive bias applied to measured water cut.
//!
//! Per device the optimizer moves through
//! `Disabled -> Sampling -> Enabled -> Disabled`.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MeteringConfig;
use crate::error::InputRejected;
use crate::models::Metric;
use crate::window::WindowStore;

/// Reason recorded when a long run of zero differential pressure disables
/// the optimizer
pub const ZERO_DP_REASON: &str = "differential pressure zero";

/// Share of significant deviations above which the optimizer activates
const ACTIVATION_RATIO: f64 = 0.5;

/// Optimizer lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerPhase {
    Disabled,
    Sampling,
    Enabled,
}

impl std::fmt::Display for OptimizerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerPhase::Disabled => write!(f, "disabled"),
            OptimizerPhase::Sampling => write!(f, "sampling"),
            OptimizerPhase::Enabled => write!(f, "enabled"),
        }
    }
}

/// Outcome of comparing one reference sample with the rolling average
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub sample_average: f64,
    pub rolling_average: f64,
    pub deviation: f64,
    /// True when this sample switched the optimizer on (or refreshed its bias)
    pub activated: bool,
}

/// Result of [`BiasOptimizer::add_reference_sample`]
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceOutcome {
    /// The device has no water-cut readings to compare against
    Unavailable,
    Recorded(ComparisonRecord),
}

/// Serializable snapshot of one device's optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStatus {
    pub device_id: String,
    pub phase: OptimizerPhase,
    pub enabled: bool,
    pub bias: Option<f64>,
    pub activation_time: Option<DateTime<Utc>>,
    pub disabled_reason: Option<String>,
    pub last_sample_time: Option<DateTime<Utc>>,
    pub deviations: Vec<f64>,
}

#[derive(Debug, Clone)]
struct OptimizerState {
    phase: OptimizerPhase,
    bias: Option<f64>,
    activation_time: Option<DateTime<Utc>>,
    /// (sample time, deviation), oldest first
    comparison_samples: VecDeque<(DateTime<Utc>, f64)>,
    disabled_reason: Option<String>,
    last_sample_time: Option<DateTime<Utc>>,
}

impl OptimizerState {
    fn new() -> Self {
        Self {
            phase: OptimizerPhase::Disabled,
            bias: None,
            activation_time: None,
            comparison_samples: VecDeque::new(),
            disabled_reason: None,
            last_sample_time: None,
        }
    }

    fn correction_active(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.phase != OptimizerPhase::Enabled {
            return None;
        }
        let bias = self.bias?;
        match self.activation_time {
            Some(at) if now < at => None,
            _ => Some(bias),
        }
    }
}

/// Per-device water-cut bias correction
pub struct BiasOptimizer {
    store: Arc<WindowStore>,
    deviation_threshold: f64,
    sample_count: usize,
    activation_delay: Duration,
    reference_span: Duration,
    zero_dp_disable_after: Option<Duration>,
    states: DashMap<String, OptimizerState>,
    /// Start of the current run of zero differential pressure per device
    zero_dp_since: DashMap<String, DateTime<Utc>>,
}

impl BiasOptimizer {
    pub fn new(store: Arc<WindowStore>, config: &MeteringConfig) -> Self {
        Self {
            store,
            deviation_threshold: config.water_cut_deviation_threshold,
            sample_count: config.comparison_sample_count.max(1),
            activation_delay: config.optimizer_activation_delay(),
            reference_span: config.reference_average_span(),
            zero_dp_disable_after: config.zero_dp_disable_after(),
            states: DashMap::new(),
            zero_dp_since: DashMap::new(),
        }
    }

    /// Compare a reference sample with the device's rolling water-cut average.
    ///
    /// The deviation joins the comparison buffer (oldest dropped beyond N) and
    /// activation is re-evaluated. Without a rolling average nothing changes.
    pub fn add_reference_sample(
        &self,
        device_id: &str,
        sample_average: f64,
        now: DateTime<Utc>,
    ) -> Result<ReferenceOutcome, InputRejected> {
        if device_id.trim().is_empty() {
            return Err(InputRejected::EmptyDeviceId);
        }
        if !sample_average.is_finite() {
            return Err(InputRejected::NonFinite {
                device_id: device_id.to_string(),
                metric: Metric::WaterCut,
                value: sample_average,
            });
        }
        if !(0.0..=1.0).contains(&sample_average) {
            return Err(InputRejected::OutOfRange {
                device_id: device_id.to_string(),
                metric: Metric::WaterCut,
                value: sample_average,
            });
        }

        let Some(rolling_average) =
            self.store
                .rolling_average(device_id, Metric::WaterCut, self.reference_span, now)
        else {
            return Ok(ReferenceOutcome::Unavailable);
        };

        let deviation = sample_average - rolling_average;
        let mut state = self
            .states
            .entry(device_id.to_string())
            .or_insert_with(OptimizerState::new);

        state.comparison_samples.push_back((now, deviation));
        while state.comparison_samples.len() > self.sample_count {
            state.comparison_samples.pop_front();
        }
        state.last_sample_time = Some(now);
        if state.phase == OptimizerPhase::Disabled {
            state.phase = OptimizerPhase::Sampling;
        }

        debug!(
            device_id = %device_id,
            sample_average,
            rolling_average,
            deviation,
            buffered = state.comparison_samples.len(),
            "Reference sample compared"
        );

        let activated = self.evaluate_activation(device_id, &mut state, now);

        Ok(ReferenceOutcome::Recorded(ComparisonRecord {
            timestamp: now,
            device_id: device_id.to_string(),
            sample_average,
            rolling_average,
            deviation,
            activated,
        }))
    }

    fn evaluate_activation(
        &self,
        device_id: &str,
        state: &mut OptimizerState,
        now: DateTime<Utc>,
    ) -> bool {
        if state.comparison_samples.len() < self.sample_count {
            return false;
        }

        let n = state.comparison_samples.len() as f64;
        let significant = state
            .comparison_samples
            .iter()
            .filter(|(_, d)| d.abs() > self.deviation_threshold)
            .count();
        let ratio = significant as f64 / n;
        if ratio <= ACTIVATION_RATIO {
            debug!(device_id = %device_id, ratio, "Deviation ratio below activation level");
            return false;
        }

        let bias = state.comparison_samples.iter().map(|(_, d)| d).sum::<f64>() / n;
        state.bias = Some(bias);
        let activation_time = now
            .checked_add_signed(self.activation_delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.activation_time = Some(activation_time);
        state.phase = OptimizerPhase::Enabled;
        state.disabled_reason = None;

        info!(
            device_id = %device_id,
            bias,
            ratio,
            activation_time = %activation_time,
            "Optimizer activated"
        );
        true
    }

    /// Corrected water cut, clamped to `[0, 1]`; the measured value when no
    /// correction is in effect at `now`
    pub fn apply_correction(&self, device_id: &str, measured: f64, now: DateTime<Utc>) -> f64 {
        match self.active_bias(device_id, now) {
            Some(bias) => (measured + bias).clamp(0.0, 1.0),
            None => measured,
        }
    }

    /// Bias in effect at `now`, if any
    pub fn active_bias(&self, device_id: &str, now: DateTime<Utc>) -> Option<f64> {
        self.states
            .get(device_id)
            .and_then(|state| state.correction_active(now))
    }

    /// Oil and water flow split using the corrected water cut
    pub fn calculate_flows(
        &self,
        device_id: &str,
        liquid_flow: f64,
        water_cut: f64,
        now: DateTime<Utc>,
    ) -> (f64, f64) {
        let wc = self.apply_correction(device_id, water_cut, now);
        (liquid_flow * (1.0 - wc), liquid_flow * wc)
    }

    /// Switch the optimizer off, dropping bias and activation time.
    ///
    /// Returns false if it was already disabled.
    pub fn disable(&self, device_id: &str, reason: &str) -> bool {
        let mut state = self
            .states
            .entry(device_id.to_string())
            .or_insert_with(OptimizerState::new);

        let changed = state.phase != OptimizerPhase::Disabled;
        state.phase = OptimizerPhase::Disabled;
        state.bias = None;
        state.activation_time = None;
        if changed || state.disabled_reason.is_none() {
            state.disabled_reason = Some(reason.to_string());
        }
        if changed {
            info!(device_id = %device_id, reason = %reason, "Optimizer disabled");
        }
        changed
    }

    /// Manually switch the optimizer on, keeping any bias it has.
    ///
    /// Returns false if it was already enabled.
    pub fn enable(&self, device_id: &str) -> bool {
        let mut state = self
            .states
            .entry(device_id.to_string())
            .or_insert_with(OptimizerState::new);

        let changed = state.phase != OptimizerPhase::Enabled;
        state.phase = OptimizerPhase::Enabled;
        state.disabled_reason = None;
        if changed {
            info!(device_id = %device_id, bias = ?state.bias, "Optimizer enabled manually");
        }
        changed
    }

    /// Drop the bias while keeping phase and buffered samples
    pub fn reset_correction(&self, device_id: &str) -> bool {
        let Some(mut state) = self.states.get_mut(device_id) else {
            return false;
        };
        state.bias = None;
        state.activation_time = None;
        info!(device_id = %device_id, "Optimizer correction reset");
        true
    }

    /// Enable every known optimizer; returns the devices that changed
    pub fn enable_all(&self) -> Vec<String> {
        self.device_ids()
            .into_iter()
            .filter(|id| self.enable(id))
            .collect()
    }

    /// Disable every known optimizer; returns the devices that changed
    pub fn disable_all(&self, reason: &str) -> Vec<String> {
        self.device_ids()
            .into_iter()
            .filter(|id| self.disable(id, reason))
            .collect()
    }

    /// Track runs of zero differential pressure and disable an enabled
    /// optimizer once the run is longer than the configured span.
    ///
    /// Returns true when this reading disabled the optimizer.
    pub fn observe_differential_pressure(
        &self,
        device_id: &str,
        differential_pressure: f64,
        timestamp: DateTime<Utc>,
    ) -> bool {
        if differential_pressure != 0.0 {
            self.zero_dp_since.remove(device_id);
            return false;
        }

        let since = *self
            .zero_dp_since
            .entry(device_id.to_string())
            .or_insert(timestamp);

        let Some(limit) = self.zero_dp_disable_after else {
            return false;
        };
        if timestamp - since <= limit {
            return false;
        }

        let enabled = self
            .states
            .get(device_id)
            .map(|s| s.phase == OptimizerPhase::Enabled)
            .unwrap_or(false);
        enabled && self.disable(device_id, ZERO_DP_REASON)
    }

    pub fn status(&self, device_id: &str) -> Option<OptimizerStatus> {
        self.states.get(device_id).map(|state| OptimizerStatus {
            device_id: device_id.to_string(),
            phase: state.phase,
            enabled: state.phase == OptimizerPhase::Enabled,
            bias: state.bias,
            activation_time: state.activation_time,
            disabled_reason: state.disabled_reason.clone(),
            last_sample_time: state.last_sample_time,
            deviations: state.comparison_samples.iter().map(|(_, d)| *d).collect(),
        })
    }

    pub fn is_enabled(&self, device_id: &str) -> bool {
        self.states
            .get(device_id)
            .map(|s| s.phase == OptimizerPhase::Enabled)
            .unwrap_or(false)
    }

    pub fn enabled_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| s.phase == OptimizerPhase::Enabled)
            .count()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.states.iter().map(|s| s.key().clone()).collect()
    }
}
