//! Configuration commands

use anyhow::Result;
use colored::Colorize;
use meter_lib::MeteringConfig;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_json, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn setting_rows(config: &MeteringConfig) -> Result<Vec<SettingRow>> {
    let serde_json::Value::Object(fields) = serde_json::to_value(config)? else {
        anyhow::bail!("configuration did not serialize to an object");
    };

    Ok(fields
        .into_iter()
        .map(|(key, value)| SettingRow {
            key,
            value: match value {
                serde_json::Value::Null => "disabled".to_string(),
                other => other.to_string(),
            },
        })
        .collect())
}

/// Print the effective configuration
pub fn show(config: &MeteringConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Table => {
            println!("{}", "Metering Configuration".bold());
            print_table(&setting_rows(config)?, "No settings");
        }
    }
    Ok(())
}

/// Check that a configuration file loads and passes validation
pub fn validate(path: &Path) -> Result<()> {
    crate::config::load(Some(path))?;
    print_success(&format!("{} is a valid metering configuration", path.display()));
    Ok(())
}
