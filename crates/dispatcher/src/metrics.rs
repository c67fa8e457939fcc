//! Per-consumer counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters of one consumer worker
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Framesets waiting in the queue
    queue_len: AtomicUsize,
    /// Framesets processed successfully
    delivered: AtomicU64,
    /// Framesets the consumer returned an error for
    failed: AtomicU64,
    /// Framesets dropped because the queue was full
    dropped: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            delivered: self.delivered(),
            failed: self.failed(),
            dropped: self.dropped(),
        }
    }
}

/// Snapshot of consumer metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}
