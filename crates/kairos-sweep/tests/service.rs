//! Sweep service iterations, crash recovery and the background loop

use async_trait::async_trait;
use kairos_core::effects::{FixedWatermark, WatermarkProvider};
use kairos_core::{
    AccessContext, Cell, KairosError, KeyRange, Result, RetryPolicy, SweepBatch, Timestamp,
};
use kairos_sweep::{
    CursorStateStore, FileCursorStore, HistorySink, MemoryCursorStore, ServiceState, SweepConfig,
    SweepJob, SweepPolicy, SweepProgress, SweepService, SweepSink, SweepStep,
};
use kairos_testkit::{
    cell, cell_range, init_test_tracing, uniform_history, FaultInjector, ManualWatermark,
    MemoryCellStore,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cursor store whose saves can be made to fail
#[derive(Default)]
struct FlakyCursorStore {
    inner: MemoryCursorStore,
    save_faults: FaultInjector,
}

#[async_trait]
impl CursorStateStore for FlakyCursorStore {
    async fn load(&self, job: &str) -> Result<Option<SweepProgress>> {
        self.inner.load(job).await
    }

    async fn save(&self, progress: &SweepProgress) -> Result<()> {
        self.save_faults.check("cursor.save")?;
        self.inner.save(progress).await
    }
}

/// Deletes through the history and records the marker of every applied batch
struct RecordingSink {
    inner: HistorySink<MemoryCellStore>,
    applied: Mutex<Vec<Option<Cell>>>,
}

#[async_trait]
impl SweepSink for RecordingSink {
    async fn apply(&self, batch: &SweepBatch, ctx: &AccessContext) -> Result<()> {
        self.inner.apply(batch, ctx).await?;
        self.applied.lock().push(batch.last_cell_examined.clone());
        Ok(())
    }
}

fn service(
    store: &MemoryCellStore,
    watermark: Arc<dyn WatermarkProvider>,
    cursors: Arc<dyn CursorStateStore>,
    config: SweepConfig,
) -> SweepService {
    SweepService::new(Arc::new(store.clone()), watermark, cursors, config).unwrap()
}

fn at(watermark: u64) -> Arc<dyn WatermarkProvider> {
    Arc::new(FixedWatermark(Timestamp(watermark)))
}

fn thorough(batch_size: u64) -> SweepConfig {
    SweepConfig::default()
        .with_policy(SweepPolicy::Thorough)
        .with_batch_size(batch_size)
        .with_page_size(16)
}

fn timestamps(store: &MemoryCellStore, c: &Cell) -> Vec<u64> {
    store.versions(c).iter().map(|v| v.timestamp.value()).collect()
}

#[tokio::test]
async fn conservative_pass_keeps_newest_version_per_cell() {
    init_test_tracing();
    let store = uniform_history(5, &[10, 20]);
    let config = SweepConfig::default().with_batch_size(2).with_page_size(16);
    let service = service(&store, at(50), Arc::new(MemoryCursorStore::new()), config);
    let job = SweepJob::new("all", KeyRange::full()).unwrap();

    let progress = service.run_until_caught_up(&job).await.unwrap();
    for index in 1..=5 {
        assert_eq!(timestamps(&store, &cell(index)), vec![20]);
    }
    assert_eq!(progress.passes_completed, 1);
    assert_eq!(progress.totals.timestamps_swept, 5);
    assert_eq!(progress.totals.batches, 5);
    assert_eq!(progress.marker, None);
    assert_eq!(progress.completed_watermark, Some(Timestamp(50)));

    let scans = store.scan_count();
    let step = service.run_once(&job).await.unwrap();
    assert_eq!(step, SweepStep::CaughtUp { watermark: Timestamp(50) });
    assert_eq!(store.scan_count(), scans);
}

#[tokio::test]
async fn crash_before_save_reapplies_the_unsaved_batch() {
    let store = uniform_history(4, &[10, 20]);
    let cursors = Arc::new(FlakyCursorStore::default());
    let sink = Arc::new(RecordingSink {
        inner: HistorySink::new(store.clone()),
        applied: Mutex::new(Vec::new()),
    });
    let config = SweepConfig::default().with_batch_size(4).with_page_size(16);
    let service = service(&store, at(50), cursors.clone(), config).with_sink(sink.clone());
    let job = SweepJob::new("all", KeyRange::full()).unwrap();

    service.run_once(&job).await.unwrap();
    cursors
        .save_faults
        .fail_next(1, KairosError::internal("process killed"));
    assert!(service.run_once(&job).await.is_err());
    assert_eq!(service.progress("all").await.unwrap().marker, Some(cell(2)));

    let progress = service.run_until_caught_up(&job).await.unwrap();
    assert_eq!(
        *sink.applied.lock(),
        vec![Some(cell(2)), Some(cell(4)), Some(cell(4))]
    );
    for index in 1..=4 {
        assert_eq!(timestamps(&store, &cell(index)), vec![20]);
    }
    assert_eq!(progress.passes_completed, 1);
}

#[tokio::test]
async fn lost_marker_restarts_job_from_range_start() {
    let store = uniform_history(4, &[10]);
    let service = service(&store, at(50), Arc::new(MemoryCursorStore::new()), thorough(1));
    let job = SweepJob::new("all", KeyRange::full()).unwrap();

    let step = service.run_once(&job).await.unwrap();
    assert!(matches!(step, SweepStep::Swept { marker: Some(ref m), .. } if *m == cell(1)));

    store.lose_cursor_once();
    assert_eq!(service.run_once(&job).await.unwrap(), SweepStep::Restarted);
    let progress = service.progress("all").await.unwrap();
    assert_eq!(progress.restarts, 1);
    assert_eq!(progress.marker, None);

    let progress = service.run_until_caught_up(&job).await.unwrap();
    assert_eq!(store.version_count(), 0);
    assert_eq!(progress.passes_completed, 1);
    assert_eq!(service.metrics().snapshot().restarts_total, 1);
}

#[tokio::test]
async fn advancing_watermark_starts_a_new_pass() {
    let store = uniform_history(3, &[10, 20, 30]);
    let watermark = ManualWatermark::new(15);
    let config = SweepConfig::default().with_page_size(4);
    let service = service(
        &store,
        Arc::new(watermark.clone()),
        Arc::new(MemoryCursorStore::new()),
        config,
    );
    let job = SweepJob::new("all", KeyRange::full()).unwrap();

    let first = service.run_until_caught_up(&job).await.unwrap();
    assert_eq!(first.totals.timestamps_swept, 0);
    assert_eq!(timestamps(&store, &cell(1)), vec![10, 20, 30]);

    watermark.set(35);
    let second = service.run_until_caught_up(&job).await.unwrap();
    assert_eq!(second.passes_completed, 2);
    for index in 1..=3 {
        assert_eq!(timestamps(&store, &cell(index)), vec![30]);
    }
}

#[tokio::test(start_paused = true)]
async fn transient_delete_failures_are_retried() {
    let store = uniform_history(3, &[10]);
    store.delete_faults().fail_transient(2);
    let config = thorough(10).with_retry(
        RetryPolicy::fixed(Duration::from_millis(10)).with_max_attempts(3),
    );
    let service = service(&store, at(50), Arc::new(MemoryCursorStore::new()), config);
    let job = SweepJob::new("all", KeyRange::full()).unwrap();

    service.run_until_caught_up(&job).await.unwrap();
    assert_eq!(store.version_count(), 0);
    assert_eq!(store.delete_faults().injected(), 2);
}

#[tokio::test]
async fn progress_survives_a_new_service_instance() {
    let dir = tempfile::tempdir().unwrap();
    let store = uniform_history(6, &[10]);
    let job = SweepJob::new("all", KeyRange::full()).unwrap();

    {
        let cursors = Arc::new(FileCursorStore::open(dir.path()).await.unwrap());
        let first = service(&store, at(50), cursors, thorough(2));
        first.run_once(&job).await.unwrap();
        first.run_once(&job).await.unwrap();
    }

    let cursors = Arc::new(FileCursorStore::open(dir.path()).await.unwrap());
    let second = service(&store, at(50), cursors, thorough(2));
    assert_eq!(second.progress("all").await.unwrap().marker, Some(cell(4)));

    let progress = second.run_until_caught_up(&job).await.unwrap();
    assert_eq!(progress.totals.batches, 3);
    assert_eq!(progress.passes_completed, 1);
    assert_eq!(store.version_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn background_loop_sweeps_disjoint_jobs_until_shutdown() {
    let store = uniform_history(20, &[10, 20]);
    let cursors = Arc::new(MemoryCursorStore::new());
    let config = thorough(3).with_idle_backoff(Duration::from_secs(5));
    let service = service(&store, at(50), cursors.clone(), config);
    let jobs = vec![
        SweepJob::new("low", cell_range(0, 11)).unwrap(),
        SweepJob::new("high", cell_range(11, 100)).unwrap(),
    ];
    let (tx, rx) = watch::channel(false);

    let (outcome, _) = tokio::join!(service.run(jobs, rx), async {
        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
    });

    outcome.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_eq!(store.version_count(), 0);
    let progress = cursors.snapshot().await;
    assert_eq!(progress["low"].passes_completed, 1);
    assert_eq!(progress["high"].passes_completed, 1);
    assert_eq!(service.metrics().snapshot().timestamps_swept_total, 40);
}

#[tokio::test]
async fn overlapping_jobs_are_refused() {
    let store = uniform_history(3, &[10]);
    let service = service(&store, at(50), Arc::new(MemoryCursorStore::new()), thorough(2));
    let jobs = vec![
        SweepJob::new("a", cell_range(0, 10)).unwrap(),
        SweepJob::new("b", cell_range(5, 20)).unwrap(),
    ];
    let (_tx, rx) = watch::channel(false);

    let result = service.run(jobs, rx).await;
    assert!(matches!(result, Err(KairosError::Invalid { .. })));
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_eq!(store.version_count(), 3);
}

#[tokio::test]
async fn permission_failure_stops_the_loop() {
    let store = uniform_history(3, &[10]);
    store
        .delete_faults()
        .fail_next(1, KairosError::permission_denied("sweeper lacks delete rights"));
    let service = service(&store, at(50), Arc::new(MemoryCursorStore::new()), thorough(10));
    let (_tx, rx) = watch::channel(false);

    let result = service
        .run(vec![SweepJob::new("all", KeyRange::full()).unwrap()], rx)
        .await;
    assert!(matches!(result, Err(KairosError::PermissionDenied { .. })));
    assert_eq!(service.state(), ServiceState::Failed);
    assert_eq!(service.metrics().snapshot().failures_total, 1);
}
