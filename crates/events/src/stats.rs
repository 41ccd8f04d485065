//! Runtime statistics for an event bus.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BusStats {
    /// Unordered publishes with at least one matched handler.
    pub published: u64,
    /// Ordered publishes with at least one matched handler.
    pub published_ordered: u64,
    /// Notifications whose handler returned successfully.
    pub delivered: u64,
    /// Notifications whose handler returned an error.
    pub failed: u64,
    /// Notifications skipped because the listener was dropped.
    pub listener_gone: u64,
    /// Notifications whose handler panicked.
    pub panicked: u64,
    /// Notifications dropped by a shutting-down pool.
    pub cancelled: u64,
    /// Dropped listeners removed from the registry.
    pub purged_listeners: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    published: AtomicU64,
    published_ordered: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    listener_gone: AtomicU64,
    panicked: AtomicU64,
    cancelled: AtomicU64,
}

impl Counters {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published_ordered(&self) {
        self.published_ordered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_gone(&self) {
        self.listener_gone.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            published_ordered: self.published_ordered.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            listener_gone: self.listener_gone.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            purged_listeners: 0,
        }
    }
}
