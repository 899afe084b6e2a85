//! Operational counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic relay counters (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Connections accepted.
    pub connections_total: AtomicU64,
    /// Successful joins.
    pub joins_total: AtomicU64,
    /// Payloads handed to a recipient outbox.
    pub messages_relayed: AtomicU64,
    /// Payloads lost because the recipient went away mid-delivery.
    pub messages_dropped: AtomicU64,
    /// Error events sent to clients.
    pub errors_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub joins_total: u64,
    pub messages_relayed: u64,
    pub messages_dropped: u64,
    pub errors_total: u64,
}

impl RelayMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            joins_total: self.joins_total.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}
