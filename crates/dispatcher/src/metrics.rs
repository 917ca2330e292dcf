//! Output metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single output, shared by all of its workers
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Batches waiting in the queue
    queue_len: AtomicUsize,
    /// Batches returned by the writer
    batches_written: AtomicU64,
    /// Batches that failed as a unit
    batches_failed: AtomicU64,
    /// Messages returned with an item error
    items_failed: AtomicU64,
    /// Writes interrupted by shutdown or deadline
    cancelled: AtomicU64,
    /// Failed connection attempts
    connect_failures: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written.load(Ordering::Relaxed)
    }

    pub fn inc_batches_written(&self) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn inc_batches_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn items_failed(&self) -> u64 {
        self.items_failed.load(Ordering::Relaxed)
    }

    pub fn add_items_failed(&self, count: u64) {
        self.items_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn inc_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    pub fn inc_connect_failures(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            batches_written: self.batches_written(),
            batches_failed: self.batches_failed(),
            items_failed: self.items_failed(),
            cancelled: self.cancelled(),
            connect_failures: self.connect_failures(),
        }
    }
}

/// Snapshot of output metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub items_failed: u64,
    pub cancelled: u64,
    pub connect_failures: u64,
}
