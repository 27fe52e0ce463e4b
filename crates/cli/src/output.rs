//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T], empty_message: &str) {
    if items.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format a 0-1 fraction as a percentage
pub fn format_percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Format an optional bias with its sign
pub fn format_bias(bias: Option<f64>) -> String {
    match bias {
        Some(b) => format!("{:+.4}", b),
        None => "-".to_string(),
    }
}

/// Color a severity or optimizer phase
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "critical" => status.red().bold().to_string(),
        "warning" | "sampling" => status.yellow().to_string(),
        "enabled" => status.green().to_string(),
        "disabled" => status.dimmed().to_string(),
        _ => status.to_string(),
    }
}

/// Mark whether an alert was sent or silenced by the cooldown
pub fn color_notified(notified: bool) -> String {
    if notified {
        "sent".green().to_string()
    } else {
        "cooldown".dimmed().to_string()
    }
}
