//! Core data models for the metering pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InputRejected;

/// The eight metrics a metering device reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    DifferentialPressure,
    Pressure,
    Temperature,
    WaterCut,
    LiquidFlow,
    WaterFlow,
    OilFlow,
    GasFlow,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::DifferentialPressure,
        Metric::Pressure,
        Metric::Temperature,
        Metric::WaterCut,
        Metric::LiquidFlow,
        Metric::WaterFlow,
        Metric::OilFlow,
        Metric::GasFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::DifferentialPressure => "differential_pressure",
            Metric::Pressure => "pressure",
            Metric::Temperature => "temperature",
            Metric::WaterCut => "water_cut",
            Metric::LiquidFlow => "liquid_flow",
            Metric::WaterFlow => "water_flow",
            Metric::OilFlow => "oil_flow",
            Metric::GasFlow => "gas_flow",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized sample from a metering device
///
/// Pressures are kPa (differential) and psi (line), temperature is °C and
/// water cut is a fraction in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub differential_pressure: f64,
    pub pressure: f64,
    pub temperature: f64,
    pub water_cut: f64,
    pub liquid_flow: f64,
    pub water_flow: f64,
    pub oil_flow: f64,
    pub gas_flow: f64,
}

impl Reading {
    /// Read a single metric by name
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::DifferentialPressure => self.differential_pressure,
            Metric::Pressure => self.pressure,
            Metric::Temperature => self.temperature,
            Metric::WaterCut => self.water_cut,
            Metric::LiquidFlow => self.liquid_flow,
            Metric::WaterFlow => self.water_flow,
            Metric::OilFlow => self.oil_flow,
            Metric::GasFlow => self.gas_flow,
        }
    }

    /// Fingerprint used for duplicate detection.
    ///
    /// Flow fields are left out so a collector that recomputes flows for an
    /// otherwise identical sample still produces the same fingerprint.
    pub fn content_fingerprint(&self) -> String {
        format!(
            "{:.2}_{:.2}_{:.2}_{:.2}",
            self.differential_pressure, self.pressure, self.temperature, self.water_cut
        )
    }

    /// Check the invariants every reading must satisfy before it may enter
    /// the window store
    pub fn validate(&self) -> Result<(), InputRejected> {
        if self.device_id.trim().is_empty() {
            return Err(InputRejected::EmptyDeviceId);
        }

        for metric in Metric::ALL {
            let value = self.metric(metric);
            if !value.is_finite() {
                return Err(InputRejected::NonFinite {
                    device_id: self.device_id.clone(),
                    metric,
                    value,
                });
            }
        }

        if !(0.0..=1.0).contains(&self.water_cut) {
            return Err(InputRejected::OutOfRange {
                device_id: self.device_id.clone(),
                metric: Metric::WaterCut,
                value: self.water_cut,
            });
        }

        Ok(())
    }

    /// Copy of this reading with a corrected water cut and the matching
    /// oil/water flow split
    pub fn with_water_cut(&self, water_cut: f64, oil_flow: f64, water_flow: f64) -> Self {
        Self {
            water_cut,
            oil_flow,
            water_flow,
            ..self.clone()
        }
    }
}

/// Collector-facing reading in which every metric may be absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub differential_pressure: Option<f64>,
    pub pressure: Option<f64>,
    pub temperature: Option<f64>,
    pub water_cut: Option<f64>,
    pub liquid_flow: Option<f64>,
    pub water_flow: Option<f64>,
    pub oil_flow: Option<f64>,
    pub gas_flow: Option<f64>,
}

impl TryFrom<RawReading> for Reading {
    type Error = InputRejected;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        let device_id = raw.device_id;
        let require = |value: Option<f64>, metric: Metric| {
            value.ok_or_else(|| InputRejected::MissingMetric {
                device_id: device_id.clone(),
                metric,
            })
        };

        let reading = Reading {
            timestamp: raw.timestamp,
            differential_pressure: require(
                raw.differential_pressure,
                Metric::DifferentialPressure,
            )?,
            pressure: require(raw.pressure, Metric::Pressure)?,
            temperature: require(raw.temperature, Metric::Temperature)?,
            water_cut: require(raw.water_cut, Metric::WaterCut)?,
            liquid_flow: require(raw.liquid_flow, Metric::LiquidFlow)?,
            water_flow: require(raw.water_flow, Metric::WaterFlow)?,
            oil_flow: require(raw.oil_flow, Metric::OilFlow)?,
            gas_flow: require(raw.gas_flow, Metric::GasFlow)?,
            device_id: device_id.clone(),
        };
        Ok(reading)
    }
}

/// A gap between two consecutive readings of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptionPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl InterruptionPeriod {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Kind of an audit trail entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    OptimizerOn,
    OptimizerOff,
    OptimizerReset,
    SampleInput,
    DeviationCalc,
    AlertTriggered,
}

/// Audit trail entry handed to the persistence sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub kind: AuditEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
        kind: AuditEventKind,
        detail: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            device_id: device_id.into(),
            kind,
            detail,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    pub fn reading_at(device_id: &str, timestamp: DateTime<Utc>) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            timestamp,
            differential_pressure: 120.0,
            pressure: 1500.0,
            temperature: 65.0,
            water_cut: 0.35,
            liquid_flow: 100.0,
            water_flow: 35.0,
            oil_flow: 65.0,
            gas_flow: 12.0,
        }
    }
}
