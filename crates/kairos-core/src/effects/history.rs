//! Ordered scans over cell history

use crate::cell::{Cell, CellHistoryEntry, CellToSweep, KeyRange};
use crate::context::AccessContext;
use crate::errors::Result;
use crate::types::Timestamp;
use async_trait::async_trait;
use std::sync::Arc;

/// Read and delete access to versioned cells
#[async_trait]
pub trait CellHistory: Send + Sync {
    /// Scan cells in `range` strictly after `after`, in ascending key order
    ///
    /// Only versions with a timestamp strictly below `below` are returned, and
    /// cells without such versions are omitted. At most `limit` cells are
    /// returned; fewer than `limit` means the range is exhausted. Backends that
    /// cannot position after `after` (for example because it was compacted
    /// away) fail with `KairosError::CursorLost`.
    async fn scan(
        &self,
        range: &KeyRange,
        after: Option<&Cell>,
        below: Timestamp,
        limit: usize,
        ctx: &AccessContext,
    ) -> Result<Vec<CellHistoryEntry>>;

    /// Remove the listed versions
    async fn delete(&self, cells: &[CellToSweep], ctx: &AccessContext) -> Result<()>;
}

#[async_trait]
impl<T: CellHistory + ?Sized> CellHistory for Arc<T> {
    async fn scan(
        &self,
        range: &KeyRange,
        after: Option<&Cell>,
        below: Timestamp,
        limit: usize,
        ctx: &AccessContext,
    ) -> Result<Vec<CellHistoryEntry>> {
        (**self).scan(range, after, below, limit, ctx).await
    }

    async fn delete(&self, cells: &[CellToSweep], ctx: &AccessContext) -> Result<()> {
        (**self).delete(cells, ctx).await
    }
}
