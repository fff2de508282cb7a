//! Metrics collection for the control plane.
//!
//! Thread-safe counters shared between connection tasks; a snapshot of
//! everything is logged on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Global metrics registry for the server.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// TCP control connections accepted
    pub connections_accepted: Counter,
    /// Control connections that reached the established state
    pub connections_established: Counter,
    /// Connections dropped on a protocol or I/O error
    pub connections_failed: Counter,
    /// Stop exchanges completed
    pub connections_stopped: Counter,

    /// Outgoing calls connected
    pub calls_opened: Counter,
    /// Outgoing call requests refused or failed
    pub calls_failed: Counter,

    /// Control messages decoded
    pub ctrl_messages_rx: Counter,
    /// Framing violations on the control channel
    pub codec_errors: Counter,

    /// PPP frames pumped off call channels
    pub frames_rx: Counter,

    /// Currently open control connections (gauge)
    pub connections_active: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conn_opened(&self) {
        self.connections_accepted.inc();
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conn_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            (
                "connections_accepted".into(),
                self.connections_accepted.get(),
            ),
            (
                "connections_established".into(),
                self.connections_established.get(),
            ),
            ("connections_failed".into(), self.connections_failed.get()),
            (
                "connections_stopped".into(),
                self.connections_stopped.get(),
            ),
            ("calls_opened".into(), self.calls_opened.get()),
            ("calls_failed".into(), self.calls_failed.get()),
            ("ctrl_messages_rx".into(), self.ctrl_messages_rx.get()),
            ("codec_errors".into(), self.codec_errors.get()),
            ("frames_rx".into(), self.frames_rx.get()),
            (
                "connections_active".into(),
                self.connections_active.load(Ordering::Relaxed),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_registry_gauge_tracks_open_connections() {
        let registry = MetricsRegistry::new();

        registry.conn_opened();
        registry.conn_opened();
        registry.conn_closed();

        let metrics = registry.export();
        assert!(metrics.contains(&("connections_accepted".into(), 2)));
        assert!(metrics.contains(&("connections_active".into(), 1)));
    }
}
