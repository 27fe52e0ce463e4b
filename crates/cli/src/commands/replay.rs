//! Offline replay of recorded well data through the metering pipeline

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use meter_lib::{
    Alert, Dispatcher, ManualClock, MemorySink, MeteringConfig, OptimizerStatus, RawReading,
    ReferenceOutcome,
};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{
    color_notified, color_status, format_bias, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// One line of a replay file
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Reading(RawReading),
    Reference {
        device_id: String,
        sample_average: f64,
        timestamp: DateTime<Utc>,
    },
    Enable {
        device_id: String,
        timestamp: DateTime<Utc>,
    },
    Disable {
        device_id: String,
        timestamp: DateTime<Utc>,
        #[serde(default)]
        reason: Option<String>,
    },
    Reset {
        device_id: String,
    },
    UptimeCheck {
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub line: usize,
    pub reason: String,
}

/// Everything a replay produced
#[derive(Debug, Default, Serialize)]
pub struct ReplayReport {
    pub events: usize,
    pub ingested: usize,
    pub reference_samples: usize,
    pub rejected: Vec<Rejection>,
    pub alerts: Vec<Alert>,
    pub optimizers: Vec<OptimizerStatus>,
    pub audit_events: usize,
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Notify")]
    notify: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled)]
struct OptimizerRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Bias")]
    bias: String,
    #[tabled(rename = "Active From")]
    active_from: String,
    #[tabled(rename = "Disabled Reason")]
    reason: String,
}

/// Run every event of `input` through a fresh pipeline
pub fn run_replay<R: BufRead>(config: MeteringConfig, input: R) -> Result<ReplayReport> {
    let clock = Arc::new(ManualClock::new(DateTime::<Utc>::default()));
    let sink = Arc::new(MemorySink::new());
    let dispatcher = Dispatcher::builder(config)
        .clock(clock.clone())
        .persistence(sink.clone())
        .build()
        .context("Invalid metering configuration")?;

    let mut report = ReplayReport::default();

    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: ReplayEvent = serde_json::from_str(line)
            .with_context(|| format!("Invalid event on line {}", line_no))?;
        report.events += 1;

        match event {
            ReplayEvent::Reading(raw) => {
                clock.set(raw.timestamp);
                match dispatcher.ingest_raw(raw) {
                    Ok(outcome) => {
                        report.ingested += 1;
                        report.alerts.extend(outcome.alerts);
                    }
                    Err(e) => report.rejected.push(Rejection {
                        line: line_no,
                        reason: e.to_string(),
                    }),
                }
            }
            ReplayEvent::Reference {
                device_id,
                sample_average,
                timestamp,
            } => {
                clock.set(timestamp);
                match dispatcher.add_reference_sample_at(&device_id, sample_average, timestamp) {
                    Ok(ReferenceOutcome::Recorded(_)) => report.reference_samples += 1,
                    Ok(ReferenceOutcome::Unavailable) => report.rejected.push(Rejection {
                        line: line_no,
                        reason: format!("device {}: no water-cut readings to compare", device_id),
                    }),
                    Err(e) => report.rejected.push(Rejection {
                        line: line_no,
                        reason: e.to_string(),
                    }),
                }
            }
            ReplayEvent::Enable {
                device_id,
                timestamp,
            } => {
                clock.set(timestamp);
                dispatcher.enable_optimizer(&device_id);
            }
            ReplayEvent::Disable {
                device_id,
                timestamp,
                reason,
            } => {
                clock.set(timestamp);
                dispatcher.disable_optimizer(&device_id, reason.as_deref().unwrap_or("manual"));
            }
            ReplayEvent::Reset { device_id } => {
                dispatcher.reset_optimizer(&device_id);
            }
            ReplayEvent::UptimeCheck { timestamp } => {
                clock.set(timestamp);
                report.alerts.extend(dispatcher.check_uptime(timestamp));
            }
        }
    }

    let mut devices = dispatcher.store().device_ids();
    devices.extend(dispatcher.optimizer_device_ids());
    devices.sort();
    devices.dedup();
    report.optimizers = devices
        .iter()
        .filter_map(|id| dispatcher.optimizer_status(id))
        .collect();
    report.audit_events = sink.audit_events().len();

    Ok(report)
}

/// `meterctl replay`
pub fn replay(
    path: &Path,
    config: MeteringConfig,
    only_notified: bool,
    format: OutputFormat,
) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let mut report = run_replay(config, std::io::BufReader::new(file))?;

    if only_notified {
        report.alerts.retain(|a| a.should_notify);
    }

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    Ok(())
}

fn print_report(report: &ReplayReport) {
    println!("{}", "Replay Summary".bold());
    println!("{}", "=".repeat(50));
    println!("Events:                 {}", report.events);
    println!("Readings ingested:      {}", report.ingested);
    println!("Reference samples:      {}", report.reference_samples);
    println!("Audit events:           {}", report.audit_events);
    println!();

    for rejection in &report.rejected {
        print_warning(&format!("line {}: {}", rejection.line, rejection.reason));
    }
    if !report.rejected.is_empty() {
        println!();
    }

    println!("{}", "Alerts".bold());
    let rows: Vec<AlertRow> = report
        .alerts
        .iter()
        .map(|a| AlertRow {
            time: a.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            device: a.device_id.clone(),
            rule: a.rule_kind.to_string(),
            severity: color_status(&a.severity.to_string()),
            notify: color_notified(a.should_notify),
            message: a.message.clone(),
        })
        .collect();
    print_table(&rows, "No alerts raised");
    println!();

    println!("{}", "Optimizers".bold());
    let rows: Vec<OptimizerRow> = report
        .optimizers
        .iter()
        .map(|s| OptimizerRow {
            device: s.device_id.clone(),
            phase: color_status(&s.phase.to_string()),
            bias: format_bias(s.bias),
            active_from: s
                .activation_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            reason: s.disabled_reason.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    print_table(&rows, "No devices seen");

    if report.rejected.is_empty() {
        println!();
        print_success("Every event was accepted");
    }
}
