//! Core library for oil-well metering
//!
//! This crate provides:
//! - Per-device sliding windows of sensor readings
//! - Loss-rate, duplicate, threshold, flatline and interruption alerting
//!   with notification cooldown
//! - Water-cut bias correction driven by reference samples
//! - The dispatcher that runs every reading through the above
//! - Health checks and observability

pub mod anomaly;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod optimizer;
pub mod pipeline;
pub mod sink;
pub mod window;

#[cfg(test)]
mod tests;

pub use anomaly::{Alert, AlertEngine, FlatlineDetector, RuleKind, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FlatlinePolicy, MeteringConfig};
pub use error::{ConfigError, InputRejected, NotifyError, SinkError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use notify::{LogNotifier, NotificationSink, NotificationWorker, Notifier};
pub use observability::{MeterMetrics, StructuredLogger};
pub use optimizer::{
    BiasOptimizer, ComparisonRecord, OptimizerPhase, OptimizerStatus, ReferenceOutcome,
};
pub use pipeline::{Dispatcher, DispatcherBuilder, IngestOutcome};
pub use sink::{MemorySink, NullSink, PersistenceSink};
pub use window::{SlidingWindow, WindowStore};
