//! Alerting for metering data
//!
//! This module provides:
//! - Temperature flatline detection
//! - A declarative rule table (duplicate, loss rate, thresholds, flatline,
//!   interruption)
//! - Alert evaluation with per (device, rule) notification cooldown

mod engine;
mod flatline;
mod rules;

pub use engine::AlertEngine;
pub use flatline::FlatlineDetector;
pub use rules::{
    evaluate_rules, Alert, RuleDefinition, RuleInput, RuleKind, RuleThresholds, Severity, RULES,
};
