//! Process-wide metrics counters.
//!
//! The spec treats metrics export as an external collaborator (§1, §5:
//! "Shared state... a logger, an optional metrics sink"); this module only
//! owns the counters themselves, constructed once per process and passed
//! into each request handler by reference. Wiring an exporter (Prometheus,
//! StatsD, ...) onto these counters is out of scope for this crate.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters incremented by the write path. Cheap to share across
/// concurrently-handled requests (§5: each RPC is handled on its own task).
#[derive(Debug, Default)]
pub struct Metrics {
    rows_written: AtomicU64,
    rows_deleted: AtomicU64,
    batches_processed: AtomicU64,
    batch_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_row_written(&self) {
        self.rows_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_written(&self, count: u64) {
        self.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_row_deleted(&self) {
        self.rows_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_processed(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_error(&self) {
        self.batch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    pub fn rows_deleted(&self) -> u64 {
        self.rows_deleted.load(Ordering::Relaxed)
    }

    pub fn batches_processed(&self) -> u64 {
        self.batches_processed.load(Ordering::Relaxed)
    }

    pub fn batch_errors(&self) -> u64 {
        self.batch_errors.load(Ordering::Relaxed)
    }
}
