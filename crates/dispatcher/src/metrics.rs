//! Per-processor counters, readable without going through the loop

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single processor worker
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    /// Batches waiting in the worker channel
    pending_batches: AtomicUsize,
    /// Dispatches delivered successfully
    delivered_count: AtomicU64,
    /// Dispatches in failed deliveries
    failure_count: AtomicU64,
    /// Batches handed to `deliver`
    batch_count: AtomicU64,
    /// Batches the worker could not accept
    rejected_count: AtomicU64,
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_batches(&self) -> usize {
        self.pending_batches.load(Ordering::Relaxed)
    }

    pub fn set_pending_batches(&self, len: usize) {
        self.pending_batches.store(len, Ordering::Relaxed);
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::Relaxed)
    }

    pub fn add_delivered(&self, n: usize) {
        self.delivered_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn add_failures(&self, n: usize) {
        self.failure_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count.load(Ordering::Relaxed)
    }

    pub fn inc_batch_count(&self) {
        self.batch_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn inc_rejected_count(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pending_batches: self.pending_batches(),
            delivered_count: self.delivered_count(),
            failure_count: self.failure_count(),
            batch_count: self.batch_count(),
            rejected_count: self.rejected_count(),
        }
    }
}

/// Point-in-time copy of [`ProcessorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub pending_batches: usize,
    pub delivered_count: u64,
    pub failure_count: u64,
    pub batch_count: u64,
    pub rejected_count: u64,
}
