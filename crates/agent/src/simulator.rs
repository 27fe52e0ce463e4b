//! Simulated well instruments
//!
//! Produces readings that wander around each device's configured base values.
//! Used when no field connection is configured.

use crate::config::DeviceConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use meter_lib::{pipeline::ReadingSource, RawReading};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reading source backed by a pseudo-random walk around base values
pub struct SimulatedSource {
    devices: HashMap<String, DeviceConfig>,
    state: AtomicU64,
}

impl SimulatedSource {
    pub fn new(devices: Vec<DeviceConfig>, seed: u64) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
            // xorshift never leaves zero
            state: AtomicU64::new(seed.max(1)),
        }
    }

    /// Uniform value in [-1, 1)
    fn noise(&self) -> f64 {
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        (x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }

    fn around(&self, base: f64, spread: f64) -> f64 {
        (base * (1.0 + spread * self.noise())).max(0.0)
    }
}

#[async_trait]
impl ReadingSource for SimulatedSource {
    async fn read(&self, device_id: &str) -> Result<RawReading> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| anyhow!("no simulated device named {}", device_id))?;

        let water_cut = (device.base_water_cut + 0.01 * self.noise()).clamp(0.0, 1.0);
        let liquid_flow = self.around(device.base_liquid_flow, 0.05);
        let water_flow = liquid_flow * water_cut;

        Ok(RawReading {
            device_id: device.id.clone(),
            timestamp: Utc::now(),
            differential_pressure: Some(self.around(device.base_differential_pressure, 0.05)),
            pressure: Some(self.around(device.base_pressure, 0.02)),
            temperature: Some(device.base_temperature + 0.5 * self.noise()),
            water_cut: Some(water_cut),
            liquid_flow: Some(liquid_flow),
            water_flow: Some(water_flow),
            oil_flow: Some(liquid_flow - water_flow),
            gas_flow: Some(self.around(device.base_gas_flow, 0.05)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_lib::Reading;

    #[tokio::test]
    async fn test_simulated_reading_is_valid() {
        let source = SimulatedSource::new(vec![DeviceConfig::new("W1")], 42);

        for _ in 0..50 {
            let raw = source.read("W1").await.unwrap();
            let reading = Reading::try_from(raw).unwrap();
            reading.validate().unwrap();
            assert!((0.0..=1.0).contains(&reading.water_cut));
            assert!((reading.oil_flow + reading.water_flow - reading.liquid_flow).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_unknown_device_is_an_error() {
        let source = SimulatedSource::new(vec![DeviceConfig::new("W1")], 7);
        assert!(source.read("W9").await.is_err());
    }

    #[test]
    fn test_noise_is_bounded() {
        let source = SimulatedSource::new(Vec::new(), 0);
        for _ in 0..1000 {
            let n = source.noise();
            assert!((-1.0..1.0).contains(&n));
        }
    }
}
