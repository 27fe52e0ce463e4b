//! Agent configuration
//!
//! Read from an optional TOML file (`METER_CONFIG`, default `meter-agent.toml`)
//! and overridden by `METER_*` environment variables. Nested keys use `__`,
//! e.g. `METER_METERING__DP_THRESHOLD_KPA=450`.

use anyhow::{bail, Context, Result};
use meter_lib::MeteringConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "meter-agent.toml";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Reading collection interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Interval of the offline-device sweep in seconds
    #[serde(default = "default_uptime_check_interval")]
    pub uptime_check_interval_secs: u64,

    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub metering: MeteringConfig,
}

/// A simulated well and the values it reads around
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,

    #[serde(default = "default_base_dp")]
    pub base_differential_pressure: f64,

    #[serde(default = "default_base_pressure")]
    pub base_pressure: f64,

    #[serde(default = "default_base_temperature")]
    pub base_temperature: f64,

    /// Fraction between 0 and 1
    #[serde(default = "default_base_water_cut")]
    pub base_water_cut: f64,

    #[serde(default = "default_base_liquid_flow")]
    pub base_liquid_flow: f64,

    #[serde(default = "default_base_gas_flow")]
    pub base_gas_flow: f64,
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_differential_pressure: default_base_dp(),
            base_pressure: default_base_pressure(),
            base_temperature: default_base_temperature(),
            base_water_cut: default_base_water_cut(),
            base_liquid_flow: default_base_liquid_flow(),
            base_gas_flow: default_base_gas_flow(),
        }
    }
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_sample_interval() -> u64 {
    60
}

fn default_uptime_check_interval() -> u64 {
    60
}

fn default_devices() -> Vec<DeviceConfig> {
    vec![DeviceConfig::new("well-1")]
}

fn default_base_dp() -> f64 {
    120.0
}

fn default_base_pressure() -> f64 {
    1500.0
}

fn default_base_temperature() -> f64 {
    65.0
}

fn default_base_water_cut() -> f64 {
    0.35
}

fn default_base_liquid_flow() -> f64 {
    100.0
}

fn default_base_gas_flow() -> f64 {
    12.0
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("METER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from `path` if it exists, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("METER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: AgentConfig = settings
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject intervals the collection loops cannot tick on
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_secs == 0 {
            bail!("Invalid agent configuration: sample_interval_secs must be > 0");
        }
        if self.uptime_check_interval_secs == 0 {
            bail!("Invalid agent configuration: uptime_check_interval_secs must be > 0");
        }
        self.metering
            .validate()
            .context("Invalid metering configuration")
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn uptime_check_interval(&self) -> Duration {
        Duration::from_secs(self.uptime_check_interval_secs)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AgentConfig::load_from(Path::new("/nonexistent/meter-agent.toml")).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.sample_interval(), Duration::from_secs(60));
        assert_eq!(config.device_ids(), vec!["well-1".to_string()]);
        assert_eq!(config.metering, MeteringConfig::default());
    }

    #[test]
    fn test_file_overrides() {
        let file = write_config(
            r#"
api_port = 9100
sample_interval_secs = 30

[[devices]]
id = "W1"
base_water_cut = 0.5

[[devices]]
id = "W2"

[metering]
dp_threshold_kpa = 450.0
notification_cooldown_minutes = 15
"#,
        );

        let config = AgentConfig::load_from(file.path()).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.device_ids(), vec!["W1".to_string(), "W2".to_string()]);
        assert_eq!(config.devices[0].base_water_cut, 0.5);
        assert_eq!(config.devices[1].base_pressure, 1500.0);
        assert_eq!(config.metering.dp_threshold_kpa, Some(450.0));
        assert_eq!(config.metering.notification_cooldown_minutes, 15);
        assert_eq!(config.metering.pressure_threshold_psi, Some(4600.0));
    }

    #[test]
    fn test_invalid_metering_config_is_rejected() {
        let file = write_config(
            r#"
[metering]
window_duration_secs = 0
"#,
        );

        assert!(AgentConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let file = write_config("sample_interval_secs = 0\n");
        let err = AgentConfig::load_from(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("sample_interval_secs"));

        let file = write_config("uptime_check_interval_secs = 0\n");
        let err = AgentConfig::load_from(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("uptime_check_interval_secs"));
    }

    #[test]
    fn test_oversized_metering_span_is_rejected() {
        let file = write_config(
            r#"
[metering]
reference_average_hours = 1000000000000000
"#,
        );

        let err = AgentConfig::load_from(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("reference_average_hours"));
    }
}
