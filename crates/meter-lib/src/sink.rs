//! Persistence collaborators
//!
//! The pipeline hands every corrected reading, every alert and the audit
//! trail to a [`PersistenceSink`]. Storage format is the sink's business.

use std::sync::Mutex;

use crate::anomaly::Alert;
use crate::error::SinkError;
use crate::models::{AuditEvent, Reading};

/// Receives pipeline output for storage
pub trait PersistenceSink: Send + Sync {
    fn persist_reading(&self, reading: &Reading) -> Result<(), SinkError>;

    fn persist_alert(&self, alert: &Alert) -> Result<(), SinkError>;

    fn record_audit(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn persist_reading(&self, _reading: &Reading) -> Result<(), SinkError> {
        Ok(())
    }

    fn persist_alert(&self, _alert: &Alert) -> Result<(), SinkError> {
        Ok(())
    }

    fn record_audit(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Append-only in-memory store
#[derive(Debug, Default)]
pub struct MemorySink {
    readings: Mutex<Vec<Reading>>,
    alerts: Mutex<Vec<Alert>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl PersistenceSink for MemorySink {
    fn persist_reading(&self, reading: &Reading) -> Result<(), SinkError> {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reading.clone());
        Ok(())
    }

    fn persist_alert(&self, alert: &Alert) -> Result<(), SinkError> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert.clone());
        Ok(())
    }

    fn record_audit(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{reading_at, t0};
    use crate::models::AuditEventKind;

    #[test]
    fn test_memory_sink_appends_in_order() {
        let sink = MemorySink::new();
        sink.persist_reading(&reading_at("W1", t0())).unwrap();
        sink.persist_reading(&reading_at("W2", t0())).unwrap();
        sink.record_audit(&AuditEvent::new(t0(), "W1", AuditEventKind::SampleInput, None))
            .unwrap();

        let readings = sink.readings();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].device_id, "W2");
        assert_eq!(sink.audit_events()[0].kind, AuditEventKind::SampleInput);
        assert!(sink.alerts().is_empty());
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let sink = NullSink;
        assert!(sink.persist_reading(&reading_at("W1", t0())).is_ok());
    }
}
