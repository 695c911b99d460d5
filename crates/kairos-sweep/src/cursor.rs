//! Bounded, resumable scan for sweepable versions
//!
//! The cursor is stateless across calls. Everything needed to continue is in
//! the marker it returns, which the caller persists.
//!
//! # Coverage
//!
//! Calling [`SweepCursor::next_batch`] repeatedly from the marker of the
//! previous batch visits every cell of the range exactly once, in ascending
//! key order, whatever the size bound. A batch always ends on a whole-cell
//! boundary; a cell with more versions than the bound forms a batch of its
//! own. Re-issuing a call with an older marker re-examines cells (which is
//! safe) but never skips one.

use crate::config::SweepConfig;
use crate::page::{pages, CellPageSource};
use crate::policy::SweepPolicy;
use futures::StreamExt;
use kairos_core::effects::CellHistory;
use kairos_core::{
    AccessContext, Cell, CellToSweep, KairosError, KeyRange, Result, RetryPolicy, SweepBatch,
    Timestamp,
};
use std::pin::pin;

/// Walks one key range of cell history in bounded batches
pub struct SweepCursor<H> {
    history: H,
    range: KeyRange,
    policy: SweepPolicy,
    page_size: usize,
    retry: RetryPolicy,
}

impl<H: CellHistory> SweepCursor<H> {
    /// Cursor over `range` using the page size, policy and retry of `config`
    pub fn new(history: H, range: KeyRange, config: &SweepConfig) -> Result<Self> {
        if config.page_size == 0 {
            return Err(KairosError::invalid("page size must be positive"));
        }
        Ok(Self {
            history,
            range,
            policy: config.policy,
            page_size: config.page_size,
            retry: config.retry.clone(),
        })
    }

    /// Collect the next batch strictly after `resume`
    ///
    /// Examines cells in ascending key order, counting every version below
    /// `watermark`, until at least `size_bound` cell-timestamp pairs have been
    /// examined or the range is exhausted. Cells whose versions are all kept
    /// by the policy still advance the marker. A batch that examined nothing
    /// is terminal and carries `resume` back unchanged.
    pub async fn next_batch(
        &self,
        resume: Option<&Cell>,
        size_bound: u64,
        watermark: Timestamp,
        ctx: &AccessContext,
    ) -> Result<SweepBatch> {
        if size_bound == 0 {
            return Err(KairosError::invalid("sweep size bound must be positive"));
        }
        if let Some(marker) = resume {
            if !self.range.contains(marker) {
                return Err(KairosError::cursor_lost(format!(
                    "marker {marker} lies outside range {}",
                    self.range
                )));
            }
        }

        let source = CellPageSource::new(
            &self.history,
            &self.range,
            resume,
            watermark,
            self.page_size,
            ctx,
            &self.retry,
        )?;
        let mut stream = pin!(pages(&source));
        let mut batch = SweepBatch::terminal(resume.cloned());

        'pages: while let Some(page) = stream.next().await {
            for entry in page? {
                batch.cells_examined += 1;
                batch.num_cell_ts_pairs_examined += entry.versions.len() as u64;

                let (timestamps, retained) = self.policy.select(&entry.versions);
                batch.last_cell_examined = Some(entry.cell.clone());
                if !timestamps.is_empty() {
                    batch.cells.push(CellToSweep {
                        cell: entry.cell,
                        timestamps,
                        retained,
                    });
                }

                if batch.num_cell_ts_pairs_examined >= size_bound {
                    break 'pages;
                }
            }
        }

        tracing::trace!(
            range = %self.range,
            cells_examined = batch.cells_examined,
            pairs_examined = batch.num_cell_ts_pairs_examined,
            cells_to_sweep = batch.cells.len(),
            "built sweep batch"
        );
        Ok(batch)
    }

    /// Key range this cursor walks
    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    /// Policy applied to each cell
    pub fn policy(&self) -> SweepPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_testkit::{cell, cell_range, MemoryCellStore};

    fn thorough(page_size: usize) -> SweepConfig {
        SweepConfig::default()
            .with_policy(SweepPolicy::Thorough)
            .with_page_size(page_size)
    }

    #[tokio::test]
    async fn test_zero_size_bound_rejected() {
        let cursor = SweepCursor::new(MemoryCellStore::new(), KeyRange::full(), &thorough(4)).unwrap();
        let ctx = AccessContext::unrestricted();
        assert!(matches!(
            cursor.next_batch(None, 0, Timestamp(10), &ctx).await,
            Err(KairosError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_marker_outside_range_is_lost() {
        let cursor = SweepCursor::new(MemoryCellStore::new(), cell_range(10, 20), &thorough(4)).unwrap();
        let ctx = AccessContext::unrestricted();
        let stray = cell(30);
        assert!(matches!(
            cursor.next_batch(Some(&stray), 5, Timestamp(10), &ctx).await,
            Err(KairosError::CursorLost { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_cell_forms_its_own_batch() {
        let store = MemoryCellStore::new();
        for ts in 1..=5 {
            store.put(cell(1), ts);
        }
        store.put(cell(2), 1);
        let cursor = SweepCursor::new(store, KeyRange::full(), &thorough(8)).unwrap();
        let ctx = AccessContext::unrestricted();

        let batch = cursor.next_batch(None, 2, Timestamp(10), &ctx).await.unwrap();
        assert_eq!(batch.cells.len(), 1);
        assert_eq!(batch.num_cell_ts_pairs_examined, 5);
        assert_eq!(batch.last_cell_examined, Some(cell(1)));
    }

    #[tokio::test]
    async fn test_conservative_cells_advance_marker_without_sweeping() {
        let store = MemoryCellStore::new();
        store.put(cell(1), 5);
        store.put(cell(2), 5);
        store.put(cell(2), 7);
        let config = SweepConfig::default().with_page_size(8);
        let cursor = SweepCursor::new(store, KeyRange::full(), &config).unwrap();
        let ctx = AccessContext::unrestricted();

        let batch = cursor.next_batch(None, 100, Timestamp(10), &ctx).await.unwrap();
        assert_eq!(batch.cells_examined, 2);
        assert_eq!(batch.last_cell_examined, Some(cell(2)));
        assert_eq!(batch.cells.len(), 1);
        assert_eq!(batch.cells[0].timestamps, vec![Timestamp(5)]);
        assert_eq!(batch.cells[0].retained, Some(Timestamp(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_scan_failures_are_retried() {
        let store = MemoryCellStore::new();
        store.put(cell(1), 1);
        store.scan_faults().fail_transient(2);
        let config = thorough(4).with_retry(
            RetryPolicy::fixed(std::time::Duration::from_millis(10)).with_max_attempts(3),
        );
        let cursor = SweepCursor::new(store.clone(), KeyRange::full(), &config).unwrap();
        let ctx = AccessContext::unrestricted();

        let batch = cursor.next_batch(None, 10, Timestamp(5), &ctx).await.unwrap();
        assert_eq!(batch.cells.len(), 1);
        assert_eq!(store.scan_faults().injected(), 2);
    }
}
