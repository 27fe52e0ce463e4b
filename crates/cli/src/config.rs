//! Metering configuration for offline commands

use anyhow::{Context, Result};
use meter_lib::MeteringConfig;
use std::path::Path;

/// Load a JSON metering configuration, or the defaults when no path is given.
///
/// Keys missing from the file keep their default values.
pub fn load(path: Option<&Path>) -> Result<MeteringConfig> {
    let Some(path) = path else {
        return Ok(MeteringConfig::default());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: MeteringConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}
