//! Where sweep batches are applied

use async_trait::async_trait;
use kairos_core::effects::CellHistory;
use kairos_core::{AccessContext, Result, SweepBatch};
use std::sync::Arc;

/// Consumer of sweep batches
///
/// `apply` may be called again with the same batch after a crash between
/// applying it and persisting the marker, so implementations must tolerate
/// repeats.
#[async_trait]
pub trait SweepSink: Send + Sync {
    /// Act on the cells of one batch
    async fn apply(&self, batch: &SweepBatch, ctx: &AccessContext) -> Result<()>;
}

#[async_trait]
impl<T: SweepSink + ?Sized> SweepSink for Arc<T> {
    async fn apply(&self, batch: &SweepBatch, ctx: &AccessContext) -> Result<()> {
        (**self).apply(batch, ctx).await
    }
}

/// Deletes swept versions from the cell history they were found in
pub struct HistorySink<H> {
    history: H,
}

impl<H: CellHistory> HistorySink<H> {
    /// Delete through `history`
    pub fn new(history: H) -> Self {
        Self { history }
    }
}

#[async_trait]
impl<H: CellHistory> SweepSink for HistorySink<H> {
    async fn apply(&self, batch: &SweepBatch, ctx: &AccessContext) -> Result<()> {
        if batch.cells.is_empty() {
            return Ok(());
        }
        self.history.delete(&batch.cells, ctx).await?;
        tracing::debug!(
            cells = batch.cells.len(),
            timestamps = batch.timestamps_to_sweep(),
            "deleted swept versions"
        );
        Ok(())
    }
}
