//! Per-endpoint traffic counters (spec.md §3, supplemented).
//!
//! Grounded in `kaos::metrics::Metrics`: the same five atomic counters,
//! minus that source's `retransmits` field (no substrate here retransmits
//! anything) and its process-wide `static METRICS`. Each particle and
//! reactor owns one instance instead, so counts reflect a single endpoint
//! rather than every endpoint in the process. Not wired into any
//! alerting or export pipeline — a caller reads a [`MetricsSnapshot`] and
//! does with it whatever it likes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one endpoint. All updates are `Relaxed`: these are
/// independent tallies, not synchronization points.
#[derive(Default)]
pub struct Metrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    backpressure_events: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            backpressure_events: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_receive(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
        }
    }
}

/// A read-only point-in-time copy of an endpoint's [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub backpressure_events: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tx={} rx={} bytes_tx={} bytes_rx={} backpressure={}",
            self.messages_sent, self.messages_received, self.bytes_sent, self.bytes_received, self.backpressure_events
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies_sends_receives_and_backpressure() {
        let m = Metrics::new();
        m.record_send(100);
        m.record_send(50);
        m.record_receive(10);
        m.record_backpressure();

        let s = m.snapshot();
        assert_eq!(s.messages_sent, 2);
        assert_eq!(s.bytes_sent, 150);
        assert_eq!(s.messages_received, 1);
        assert_eq!(s.bytes_received, 10);
        assert_eq!(s.backpressure_events, 1);
    }
}
