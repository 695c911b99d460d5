//! In-memory versioned cell store

use crate::faults::FaultInjector;
use async_trait::async_trait;
use kairos_core::effects::CellHistory;
use kairos_core::{
    AccessContext, Cell, CellHistoryEntry, CellToSweep, CellVersion, KairosError, KeyRange, Result,
    Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound as RangeBound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Capability restricting a context to rows starting with a prefix
///
/// Scans under this capability skip other rows; deletes of other rows fail
/// with `PermissionDenied`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPrefix(pub Vec<u8>);

impl RowPrefix {
    fn allows(&self, cell: &Cell) -> bool {
        cell.row.starts_with(&self.0)
    }
}

fn visible(ctx: &AccessContext, cell: &Cell) -> bool {
    ctx.capability::<RowPrefix>()
        .map_or(true, |prefix| prefix.allows(cell))
}

/// Versioned cells kept in key order
#[derive(Debug, Clone, Default)]
pub struct MemoryCellStore {
    cells: Arc<RwLock<BTreeMap<Cell, Vec<CellVersion>>>>,
    scan_faults: FaultInjector,
    delete_faults: FaultInjector,
    lose_cursor: Arc<AtomicBool>,
    scans: Arc<AtomicU64>,
    deleted: Arc<Mutex<Vec<(Cell, Timestamp)>>>,
}

impl MemoryCellStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value version of `cell` at `timestamp`
    pub fn put(&self, cell: Cell, timestamp: u64) {
        self.put_version(cell, CellVersion::value(timestamp));
    }

    /// Write an explicit version, keeping versions sorted by timestamp
    pub fn put_version(&self, cell: Cell, version: CellVersion) {
        let mut cells = self.cells.write();
        let versions = cells.entry(cell).or_default();
        if let Err(pos) = versions.binary_search_by_key(&version.timestamp, |v| v.timestamp) {
            versions.insert(pos, version);
        }
    }

    /// Remove a cell entirely, as compaction would
    pub fn compact_away(&self, cell: &Cell) {
        self.cells.write().remove(cell);
    }

    /// All versions currently stored for `cell`
    pub fn versions(&self, cell: &Cell) -> Vec<CellVersion> {
        self.cells.read().get(cell).cloned().unwrap_or_default()
    }

    /// Number of cells holding at least one version
    pub fn cell_count(&self) -> usize {
        self.cells.read().len()
    }

    /// Number of stored versions across all cells
    pub fn version_count(&self) -> usize {
        self.cells.read().values().map(Vec::len).sum()
    }

    /// Every `(cell, timestamp)` removed so far, in deletion order
    pub fn deleted(&self) -> Vec<(Cell, Timestamp)> {
        self.deleted.lock().clone()
    }

    /// Number of scans served
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    /// Fault schedule applied to scans
    pub fn scan_faults(&self) -> &FaultInjector {
        &self.scan_faults
    }

    /// Fault schedule applied to deletes
    pub fn delete_faults(&self) -> &FaultInjector {
        &self.delete_faults
    }

    /// Make the next positioned scan fail with `CursorLost`
    pub fn lose_cursor_once(&self) {
        self.lose_cursor.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CellHistory for MemoryCellStore {
    async fn scan(
        &self,
        range: &KeyRange,
        after: Option<&Cell>,
        below: Timestamp,
        limit: usize,
        ctx: &AccessContext,
    ) -> Result<Vec<CellHistoryEntry>> {
        self.scan_faults.check("history.scan")?;
        if after.is_some() && self.lose_cursor.swap(false, Ordering::SeqCst) {
            return Err(KairosError::cursor_lost("resume position compacted away"));
        }
        self.scans.fetch_add(1, Ordering::SeqCst);

        let lower = match (after, &range.start) {
            (Some(after), Some(start)) if after < start => RangeBound::Included(start.clone()),
            (Some(after), _) => RangeBound::Excluded(after.clone()),
            (None, Some(start)) => RangeBound::Included(start.clone()),
            (None, None) => RangeBound::Unbounded,
        };

        let cells = self.cells.read();
        let entries = cells
            .range((lower, RangeBound::Unbounded))
            .take_while(|(cell, _)| range.end.as_ref().map_or(true, |end| *cell < end))
            .filter(|(cell, _)| visible(ctx, cell))
            .filter_map(|(cell, versions)| {
                let older: Vec<CellVersion> = versions
                    .iter()
                    .filter(|v| v.timestamp < below)
                    .copied()
                    .collect();
                (!older.is_empty()).then(|| CellHistoryEntry {
                    cell: cell.clone(),
                    versions: older,
                })
            })
            .take(limit)
            .collect();
        Ok(entries)
    }

    async fn delete(&self, cells: &[CellToSweep], ctx: &AccessContext) -> Result<()> {
        self.delete_faults.check("history.delete")?;
        if let Some(denied) = cells.iter().find(|c| !visible(ctx, &c.cell)) {
            return Err(KairosError::permission_denied(format!(
                "context may not delete from {}",
                denied.cell
            )));
        }

        let mut store = self.cells.write();
        let mut deleted = self.deleted.lock();
        for sweep in cells {
            let Some(versions) = store.get_mut(&sweep.cell) else {
                continue;
            };
            versions.retain(|v| {
                let remove = sweep.timestamps.contains(&v.timestamp);
                if remove {
                    deleted.push((sweep.cell.clone(), v.timestamp));
                }
                !remove
            });
            if versions.is_empty() {
                store.remove(&sweep.cell);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::cell;

    #[tokio::test]
    async fn test_scan_returns_versions_below_watermark_in_order() {
        let store = MemoryCellStore::new();
        store.put(cell(2), 10);
        store.put(cell(1), 40);
        store.put(cell(1), 60);
        store.put(cell(3), 70);

        let ctx = AccessContext::unrestricted();
        let entries = store
            .scan(&KeyRange::full(), None, Timestamp(50), 10, &ctx)
            .await
            .unwrap();

        let cells: Vec<_> = entries.iter().map(|e| e.cell.clone()).collect();
        assert_eq!(cells, vec![cell(1), cell(2)]);
        assert_eq!(entries[0].versions, vec![CellVersion::value(40)]);
    }

    #[tokio::test]
    async fn test_scan_resumes_strictly_after_marker() {
        let store = MemoryCellStore::new();
        for i in 1..=4 {
            store.put(cell(i), 1);
        }

        let ctx = AccessContext::unrestricted();
        let entries = store
            .scan(&KeyRange::full(), Some(&cell(2)), Timestamp(50), 10, &ctx)
            .await
            .unwrap();
        let cells: Vec<_> = entries.into_iter().map(|e| e.cell).collect();
        assert_eq!(cells, vec![cell(3), cell(4)]);
    }

    #[tokio::test]
    async fn test_lost_cursor_fires_once() {
        let store = MemoryCellStore::new();
        store.put(cell(1), 1);
        store.lose_cursor_once();
        let ctx = AccessContext::unrestricted();

        // Unpositioned scans are unaffected.
        assert!(store
            .scan(&KeyRange::full(), None, Timestamp(5), 1, &ctx)
            .await
            .is_ok());
        assert!(matches!(
            store
                .scan(&KeyRange::full(), Some(&cell(0)), Timestamp(5), 1, &ctx)
                .await,
            Err(KairosError::CursorLost { .. })
        ));
        assert!(store
            .scan(&KeyRange::full(), Some(&cell(0)), Timestamp(5), 1, &ctx)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_restricted_context_cannot_delete_other_rows() {
        let store = MemoryCellStore::new();
        store.put(Cell::new("tenant-a/1", "c"), 1);
        store.put(Cell::new("tenant-b/1", "c"), 1);
        let ctx = AccessContext::new(RowPrefix(b"tenant-a".to_vec()));

        let visible = store
            .scan(&KeyRange::full(), None, Timestamp(5), 10, &ctx)
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);

        let foreign = CellToSweep {
            cell: Cell::new("tenant-b/1", "c"),
            timestamps: vec![Timestamp(1)],
            retained: None,
        };
        assert!(matches!(
            store.delete(&[foreign], &ctx).await,
            Err(KairosError::PermissionDenied { .. })
        ));
        assert_eq!(store.version_count(), 2);
    }
}
