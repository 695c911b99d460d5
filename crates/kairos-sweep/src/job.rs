//! Sweep jobs and their persisted progress
//!
//! The resume marker of each job is owned by a [`CursorStateStore`], not by
//! the cursor, so a job can be resumed by any process that can reach the
//! store. Progress is saved only after a batch has been applied.

use crate::page::{pages, PageSource};
use async_trait::async_trait;
use futures::TryStreamExt;
use kairos_core::{Cell, KairosError, KeyRange, Result, SweepBatch, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

// =============================================================================
// Jobs
// =============================================================================

/// One independent sweep over a key range
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepJob {
    /// Stable identifier; progress is stored under it
    pub id: String,
    /// Cells this job owns
    pub range: KeyRange,
}

impl SweepJob {
    /// Create a job; the id must be non-empty and filename-safe
    pub fn new(id: impl Into<String>, range: KeyRange) -> Result<Self> {
        let id = id.into();
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe || id.starts_with('.') {
            return Err(KairosError::invalid(format!("invalid sweep job id {id:?}")));
        }
        Ok(Self { id, range })
    }
}

/// Reject job sets with duplicate ids or overlapping ranges
pub fn validate_disjoint(jobs: &[SweepJob]) -> Result<()> {
    for (i, job) in jobs.iter().enumerate() {
        for other in &jobs[i + 1..] {
            if job.id == other.id {
                return Err(KairosError::invalid(format!("duplicate sweep job {}", job.id)));
            }
            if job.range.overlaps(&other.range) {
                return Err(KairosError::invalid(format!(
                    "sweep jobs {} {} and {} {} overlap",
                    job.id, job.range, other.id, other.range
                )));
            }
        }
    }
    Ok(())
}

/// Collect every job listed by `source` and check that they are disjoint
pub async fn discover_jobs<S>(source: &S) -> Result<Vec<SweepJob>>
where
    S: PageSource<Item = SweepJob>,
{
    let jobs: Vec<SweepJob> = pages(source).try_concat().await?;
    validate_disjoint(&jobs)?;
    tracing::debug!(jobs = jobs.len(), "discovered sweep jobs");
    Ok(jobs)
}

// =============================================================================
// Progress
// =============================================================================

/// Running totals across every batch a job has applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepTotals {
    /// Batches applied
    pub batches: u64,
    /// Cells examined
    pub cells_examined: u64,
    /// Cell-timestamp pairs examined
    pub pairs_examined: u64,
    /// Versions removed
    pub timestamps_swept: u64,
}

/// Durable state of one sweep job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepProgress {
    /// Job this progress belongs to
    pub job: String,
    /// Resume strictly after this cell; `None` starts at the range start
    pub marker: Option<Cell>,
    /// Lowest watermark used by the pass in progress
    pub watermark: Option<Timestamp>,
    /// Watermark of the most recently completed pass
    pub completed_watermark: Option<Timestamp>,
    /// Running totals
    pub totals: SweepTotals,
    /// Times the job restarted from its range start after losing its marker
    pub restarts: u64,
    /// Full passes over the range
    pub passes_completed: u64,
}

impl SweepProgress {
    /// Fresh progress for `job`
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            marker: None,
            watermark: None,
            completed_watermark: None,
            totals: SweepTotals::default(),
            restarts: 0,
            passes_completed: 0,
        }
    }

    /// Lowest watermark the current pass has swept at, including `watermark`
    fn pass_floor(&self, watermark: Timestamp) -> Timestamp {
        match (&self.marker, self.watermark) {
            (Some(_), Some(floor)) => floor.min(watermark),
            _ => watermark,
        }
    }

    /// Fold an applied batch in and advance the marker
    pub fn record_batch(&mut self, batch: &SweepBatch, watermark: Timestamp) {
        self.watermark = Some(self.pass_floor(watermark));
        self.marker = batch.last_cell_examined.clone();
        self.totals.batches += 1;
        self.totals.cells_examined += batch.cells_examined;
        self.totals.pairs_examined += batch.num_cell_ts_pairs_examined;
        self.totals.timestamps_swept += batch.timestamps_to_sweep();
    }

    /// Close the current pass; the next one starts at the range start
    ///
    /// The pass is recorded at the lowest watermark any of its batches used,
    /// since cells early in the range were only swept up to that point.
    pub fn complete_pass(&mut self, watermark: Timestamp) {
        self.completed_watermark = Some(self.pass_floor(watermark));
        self.marker = None;
        self.watermark = None;
        self.passes_completed += 1;
    }

    /// Drop the marker after it stopped resolving
    pub fn restart(&mut self) {
        self.marker = None;
        self.watermark = None;
        self.restarts += 1;
    }

    /// True when a pass at `watermark` would find nothing new
    pub fn is_caught_up(&self, watermark: Timestamp) -> bool {
        self.marker.is_none() && self.completed_watermark.is_some_and(|done| done >= watermark)
    }
}

// =============================================================================
// Cursor state storage
// =============================================================================

/// Where job progress is persisted between iterations and across restarts
#[async_trait]
pub trait CursorStateStore: Send + Sync {
    /// Saved progress for `job`, if any
    async fn load(&self, job: &str) -> Result<Option<SweepProgress>>;

    /// Persist `progress`, replacing what was stored for its job
    async fn save(&self, progress: &SweepProgress) -> Result<()>;
}

#[async_trait]
impl<T: CursorStateStore + ?Sized> CursorStateStore for Arc<T> {
    async fn load(&self, job: &str) -> Result<Option<SweepProgress>> {
        (**self).load(job).await
    }

    async fn save(&self, progress: &SweepProgress) -> Result<()> {
        (**self).save(progress).await
    }
}

/// Process-local progress store
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    entries: Arc<RwLock<HashMap<String, SweepProgress>>>,
}

impl MemoryCursorStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored progress record
    pub async fn snapshot(&self) -> HashMap<String, SweepProgress> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl CursorStateStore for MemoryCursorStore {
    async fn load(&self, job: &str) -> Result<Option<SweepProgress>> {
        Ok(self.entries.read().await.get(job).cloned())
    }

    async fn save(&self, progress: &SweepProgress) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(progress.job.clone(), progress.clone());
        Ok(())
    }
}

/// Progress stored as one JSON file per job
///
/// Writes go to a temporary file that is renamed over the old one, so a
/// crash mid-write leaves the previous progress intact.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    /// Store progress files under `dir`, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, job: &str) -> PathBuf {
        self.dir.join(format!("{job}.json"))
    }
}

#[async_trait]
impl CursorStateStore for FileCursorStore {
    async fn load(&self, job: &str) -> Result<Option<SweepProgress>> {
        match tokio::fs::read(self.path_for(job)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, progress: &SweepProgress) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(progress)?;
        let path = self.path_for(&progress.job);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ListingPageSource;
    use kairos_testkit::{cell, cell_range};

    #[test]
    fn test_job_ids_must_be_filename_safe() {
        assert!(SweepJob::new("users-0", KeyRange::full()).is_ok());
        assert!(SweepJob::new("", KeyRange::full()).is_err());
        assert!(SweepJob::new("../etc", KeyRange::full()).is_err());
        assert!(SweepJob::new("a/b", KeyRange::full()).is_err());
    }

    #[test]
    fn test_overlapping_jobs_rejected() {
        let left = SweepJob::new("left", cell_range(0, 10)).unwrap();
        let right = SweepJob::new("right", cell_range(10, 20)).unwrap();
        let wide = SweepJob::new("wide", cell_range(5, 15)).unwrap();

        assert!(validate_disjoint(&[left.clone(), right.clone()]).is_ok());
        assert!(validate_disjoint(&[left.clone(), wide]).is_err());
        assert!(validate_disjoint(&[left.clone(), left]).is_err());
    }

    #[tokio::test]
    async fn test_discover_jobs_walks_every_page() {
        let listed: Vec<SweepJob> = (0..5)
            .map(|i| SweepJob::new(format!("shard-{i}"), cell_range(i * 10, i * 10 + 10)).unwrap())
            .collect();
        let source = ListingPageSource::new(listed.clone(), 2).unwrap();
        assert_eq!(discover_jobs(&source).await.unwrap(), listed);

        let clash = vec![listed[0].clone(), SweepJob::new("other", cell_range(5, 8)).unwrap()];
        let source = ListingPageSource::new(clash, 2).unwrap();
        assert!(discover_jobs(&source).await.is_err());
    }

    #[test]
    fn test_caught_up_needs_completed_pass_at_watermark() {
        let mut progress = SweepProgress::new("job");
        assert!(!progress.is_caught_up(Timestamp(10)));

        progress.complete_pass(Timestamp(10));
        assert!(progress.is_caught_up(Timestamp(10)));
        assert!(!progress.is_caught_up(Timestamp(11)));

        progress.marker = Some(cell(1));
        assert!(!progress.is_caught_up(Timestamp(10)));
    }

    #[test]
    fn test_pass_completes_at_its_lowest_watermark() {
        let mut progress = SweepProgress::new("job");
        let batch = SweepBatch {
            cells_examined: 1,
            num_cell_ts_pairs_examined: 1,
            last_cell_examined: Some(cell(1)),
            ..SweepBatch::default()
        };
        progress.record_batch(&batch, Timestamp(20));
        progress.record_batch(&batch, Timestamp(35));
        assert_eq!(progress.watermark, Some(Timestamp(20)));

        progress.complete_pass(Timestamp(40));
        assert_eq!(progress.completed_watermark, Some(Timestamp(20)));
        assert!(progress.is_caught_up(Timestamp(20)));
        assert!(!progress.is_caught_up(Timestamp(40)));
        assert_eq!(progress.totals.batches, 2);
    }

    #[tokio::test]
    async fn test_file_store_round_trips_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::open(dir.path().join("cursors")).await.unwrap();
        assert_eq!(store.load("job").await.unwrap(), None);

        let mut progress = SweepProgress::new("job");
        progress.marker = Some(cell(7));
        progress.restarts = 2;
        store.save(&progress).await.unwrap();

        let reopened = FileCursorStore::open(dir.path().join("cursors")).await.unwrap();
        assert_eq!(reopened.load("job").await.unwrap(), Some(progress));
    }
}
