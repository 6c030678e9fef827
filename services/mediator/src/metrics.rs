//! Observability and metrics for the mediation service
//!
//! Counter collection for monitoring: ingestion throughput, forwarding
//! drops, persistence flushes and failures, protocol violations. Alerts
//! accumulate for the embedding process to drain and report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Severity of a raised alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// A single alert condition raised by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Core metrics for the mediation service.
pub struct ServiceMetrics {
    // Ingestion
    pub ticks_processed: AtomicU64,
    pub ticks_dropped: AtomicU64,

    // Forwarding
    pub quotations_forwarded: AtomicU64,
    pub forwards_sent: AtomicU64,
    pub forwards_dropped: AtomicU64,
    pub acks_received: AtomicU64,
    pub protocol_violations: AtomicU64,

    // Persistence
    pub flushes_completed: AtomicU64,
    pub quotations_persisted: AtomicU64,
    pub flush_failures: AtomicU64,
    pub backlog_alerts: AtomicU64,

    // Raised alert conditions
    alerts: Mutex<Vec<Alert>>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            ticks_processed: AtomicU64::new(0),
            ticks_dropped: AtomicU64::new(0),
            quotations_forwarded: AtomicU64::new(0),
            forwards_sent: AtomicU64::new(0),
            forwards_dropped: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            flushes_completed: AtomicU64::new(0),
            quotations_persisted: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            backlog_alerts: AtomicU64::new(0),
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// Record a tick fully processed by the pipeline worker.
    pub fn record_tick_processed(&self) {
        self.ticks_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick dropped before reaching the persistence buffer.
    pub fn record_tick_dropped(&self) {
        self.ticks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a changed quotation handed to the forwarding sink.
    pub fn record_forwarded(&self) {
        self.quotations_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a quotation written to the downstream stream.
    pub fn record_forward_sent(&self) {
        self.forwards_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a quotation dropped because no stream was open.
    pub fn record_forward_dropped(&self) {
        self.forwards_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acknowledgement consumed from the downstream stream.
    pub fn record_ack(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unexpected acknowledgement reply.
    pub fn record_protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed persistence flush of `count` quotations.
    pub fn record_flush(&self, count: usize) {
        self.flushes_completed.fetch_add(1, Ordering::Relaxed);
        self.quotations_persisted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a failed persistence flush.
    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise the backpressure alert for an oversized persistence backlog.
    pub fn raise_backlog_alert(&self, backlog: usize) {
        self.backlog_alerts.fetch_add(1, Ordering::Relaxed);
        self.push_alert(Alert {
            level: AlertLevel::Critical,
            metric: "persistence_backlog".to_string(),
            message: format!("persistence backlog at {} quotations", backlog),
        });
    }

    /// Drain all accumulated alerts.
    pub fn drain_alerts(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(mut alerts) => std::mem::take(&mut *alerts),
            Err(_) => Vec::new(),
        }
    }

    fn push_alert(&self, alert: Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ServiceMetrics::new();
        metrics.record_tick_processed();
        metrics.record_tick_processed();
        metrics.record_forwarded();
        metrics.record_flush(250);

        assert_eq!(metrics.ticks_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.quotations_forwarded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.flushes_completed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.quotations_persisted.load(Ordering::Relaxed), 250);
    }

    #[test]
    fn test_backlog_alert_accumulates() {
        let metrics = ServiceMetrics::new();
        metrics.raise_backlog_alert(12_000);

        let alerts = metrics.drain_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert!(alerts[0].message.contains("12000"));

        // Drained: second read is empty
        assert!(metrics.drain_alerts().is_empty());
    }
}
