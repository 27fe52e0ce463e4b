//! Well metering CLI
//!
//! Replays recorded readings and reference samples through the metering
//! pipeline offline, and inspects metering configuration files.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Well metering CLI
#[derive(Parser)]
#[command(name = "meterctl")]
#[command(author, version, about = "CLI for the well metering pipeline", long_about = None)]
pub struct Cli {
    /// Metering configuration file (JSON); defaults are used when omitted
    #[arg(long, short, env = "METERCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a JSON-lines event file through the pipeline and report the outcome
    Replay {
        /// Event file, one JSON event per line
        file: PathBuf,

        /// Only list alerts that were not silenced by the cooldown
        #[arg(long)]
        only_notified: bool,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective metering configuration
    Show,

    /// Validate a metering configuration file
    Validate {
        /// Configuration file to check
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "error" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Replay {
            file,
            only_notified,
        } => {
            let config = config::load(cli.config.as_deref())?;
            commands::replay::replay(&file, config, only_notified, cli.format)?;
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => {
                let config = config::load(cli.config.as_deref())?;
                commands::config::show(&config, cli.format)?;
            }
            ConfigCommands::Validate { file } => {
                commands::config::validate(&file)?;
            }
        },
    }

    Ok(())
}
