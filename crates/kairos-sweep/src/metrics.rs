//! Sweep counters
//!
//! Counters follow Prometheus naming. They are process-local and reset on
//! restart; durable per-job totals live in the job progress instead.

use kairos_core::SweepBatch;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every job of a sweep service
#[derive(Debug, Default)]
pub struct SweepMetrics {
    batches_total: AtomicU64,
    cells_examined_total: AtomicU64,
    pairs_examined_total: AtomicU64,
    cells_swept_total: AtomicU64,
    timestamps_swept_total: AtomicU64,
    restarts_total: AtomicU64,
    passes_completed_total: AtomicU64,
    failures_total: AtomicU64,
}

/// Point-in-time copy of [`SweepMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepMetricsSnapshot {
    /// Non-terminal batches applied
    pub batches_total: u64,
    /// Cells examined
    pub cells_examined_total: u64,
    /// Cell-timestamp pairs examined
    pub pairs_examined_total: u64,
    /// Cells that had at least one version removed
    pub cells_swept_total: u64,
    /// Versions removed
    pub timestamps_swept_total: u64,
    /// Restarts from the range start after a lost marker
    pub restarts_total: u64,
    /// Full passes over a job range
    pub passes_completed_total: u64,
    /// Iterations that ended in an error
    pub failures_total: u64,
}

impl SweepMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_batch(&self, batch: &SweepBatch) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.cells_examined_total
            .fetch_add(batch.cells_examined, Ordering::Relaxed);
        self.pairs_examined_total
            .fetch_add(batch.num_cell_ts_pairs_examined, Ordering::Relaxed);
        self.cells_swept_total
            .fetch_add(batch.cells.len() as u64, Ordering::Relaxed);
        self.timestamps_swept_total
            .fetch_add(batch.timestamps_to_sweep(), Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass(&self) {
        self.passes_completed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> SweepMetricsSnapshot {
        SweepMetricsSnapshot {
            batches_total: self.batches_total.load(Ordering::Relaxed),
            cells_examined_total: self.cells_examined_total.load(Ordering::Relaxed),
            pairs_examined_total: self.pairs_examined_total.load(Ordering::Relaxed),
            cells_swept_total: self.cells_swept_total.load(Ordering::Relaxed),
            timestamps_swept_total: self.timestamps_swept_total.load(Ordering::Relaxed),
            restarts_total: self.restarts_total.load(Ordering::Relaxed),
            passes_completed_total: self.passes_completed_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
        }
    }

    /// Log the current values at info level
    pub fn report(&self) {
        let s = self.snapshot();
        tracing::info!(
            batches = s.batches_total,
            cells_examined = s.cells_examined_total,
            pairs_examined = s.pairs_examined_total,
            cells_swept = s.cells_swept_total,
            timestamps_swept = s.timestamps_swept_total,
            restarts = s.restarts_total,
            passes = s.passes_completed_total,
            failures = s.failures_total,
            "sweep metrics"
        );
    }
}
