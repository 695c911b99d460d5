//! Background sweep service
//!
//! Drives one [`SweepCursor`] per job. Each iteration reads the watermark,
//! builds one bounded batch, hands it to the sink, and only then persists the
//! advanced marker. A crash between apply and save re-applies the batch on
//! restart, which sinks tolerate.
//!
//! # Usage
//!
//! ```rust,no_run
//! use kairos_core::effects::FixedWatermark;
//! use kairos_core::{KeyRange, Timestamp};
//! use kairos_sweep::{MemoryCursorStore, SweepConfig, SweepJob, SweepService};
//! use std::sync::Arc;
//!
//! # async fn example(history: Arc<dyn kairos_core::effects::CellHistory>) -> kairos_core::Result<()> {
//! let service = SweepService::new(
//!     history,
//!     Arc::new(FixedWatermark(Timestamp(1_000))),
//!     Arc::new(MemoryCursorStore::new()),
//!     SweepConfig::default(),
//! )?;
//! let job = SweepJob::new("all", KeyRange::full())?;
//! service.run_until_caught_up(&job).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::SweepConfig;
use crate::cursor::SweepCursor;
use crate::job::{validate_disjoint, CursorStateStore, SweepJob, SweepProgress};
use crate::metrics::SweepMetrics;
use crate::sink::{HistorySink, SweepSink};
use kairos_core::config::ConfigValidation;
use kairos_core::effects::{CellHistory, WatermarkProvider};
use kairos_core::{AccessContext, Cell, KairosError, Result, Timestamp};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

// =============================================================================
// Service state
// =============================================================================

/// Lifecycle of the background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not running
    Stopped,
    /// Jobs are being swept
    Running,
    /// The last run ended with an error
    Failed,
}

/// Outcome of one sweep iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepStep {
    /// A batch was applied and the marker advanced
    Swept {
        /// Cells examined by the batch
        cells_examined: u64,
        /// Versions removed
        timestamps_swept: u64,
        /// Marker persisted after the batch
        marker: Option<Cell>,
    },
    /// The job has covered its whole range at this watermark
    CaughtUp {
        /// Watermark the job is caught up with
        watermark: Timestamp,
    },
    /// The marker no longer resolved; the job restarts at its range start
    Restarted,
}

// =============================================================================
// Sweep service
// =============================================================================

/// Sweeps a set of jobs against one cell history
pub struct SweepService {
    history: Arc<dyn CellHistory>,
    watermark: Arc<dyn WatermarkProvider>,
    sink: Arc<dyn SweepSink>,
    cursors: Arc<dyn CursorStateStore>,
    config: SweepConfig,
    ctx: AccessContext,
    metrics: SweepMetrics,
    state: RwLock<ServiceState>,
}

impl SweepService {
    /// Create a service that deletes swept versions from `history`
    pub fn new(
        history: Arc<dyn CellHistory>,
        watermark: Arc<dyn WatermarkProvider>,
        cursors: Arc<dyn CursorStateStore>,
        config: SweepConfig,
    ) -> Result<Self> {
        config.validate()?;
        let sink: Arc<dyn SweepSink> = Arc::new(HistorySink::new(history.clone()));
        Ok(Self {
            history,
            watermark,
            sink,
            cursors,
            config,
            ctx: AccessContext::unrestricted(),
            metrics: SweepMetrics::new(),
            state: RwLock::new(ServiceState::Stopped),
        })
    }

    /// Hand batches to `sink` instead of deleting from the history
    pub fn with_sink(mut self, sink: Arc<dyn SweepSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Thread `ctx` through every scan and apply
    pub fn with_context(mut self, ctx: AccessContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Stored progress of `job`, or fresh progress if none was saved
    pub async fn progress(&self, job: &str) -> Result<SweepProgress> {
        Ok(self
            .cursors
            .load(job)
            .await?
            .unwrap_or_else(|| SweepProgress::new(job)))
    }

    /// Run one iteration of `job`
    pub async fn run_once(&self, job: &SweepJob) -> Result<SweepStep> {
        let mut progress = self.progress(&job.id).await?;
        let watermark = self.watermark.sweep_watermark().await?;
        if progress.is_caught_up(watermark) {
            return Ok(SweepStep::CaughtUp { watermark });
        }

        let cursor = SweepCursor::new(self.history.clone(), job.range.clone(), &self.config)?;
        let batch = match cursor
            .next_batch(
                progress.marker.as_ref(),
                self.config.batch_size,
                watermark,
                &self.ctx,
            )
            .await
        {
            Ok(batch) => batch,
            Err(err @ KairosError::CursorLost { .. }) => {
                tracing::warn!(job = %job.id, error = %err, "sweep marker lost, restarting at range start");
                progress.restart();
                self.cursors.save(&progress).await?;
                self.metrics.record_restart();
                return Ok(SweepStep::Restarted);
            }
            Err(err) => return Err(err),
        };

        if batch.is_terminal() {
            progress.complete_pass(watermark);
            self.cursors.save(&progress).await?;
            self.metrics.record_pass();
            tracing::info!(
                job = %job.id,
                watermark = %watermark,
                passes = progress.passes_completed,
                timestamps_swept = progress.totals.timestamps_swept,
                "sweep pass complete"
            );
            return Ok(SweepStep::CaughtUp { watermark });
        }

        self.config
            .retry
            .execute("sweep.apply", || self.sink.apply(&batch, &self.ctx))
            .await?;
        progress.record_batch(&batch, watermark);
        self.cursors.save(&progress).await?;
        self.metrics.record_batch(&batch);

        tracing::debug!(
            job = %job.id,
            cells_examined = batch.cells_examined,
            timestamps_swept = batch.timestamps_to_sweep(),
            "applied sweep batch"
        );
        Ok(SweepStep::Swept {
            cells_examined: batch.cells_examined,
            timestamps_swept: batch.timestamps_to_sweep(),
            marker: progress.marker,
        })
    }

    /// Iterate `job` until it is caught up with the watermark
    pub async fn run_until_caught_up(&self, job: &SweepJob) -> Result<SweepProgress> {
        loop {
            if let SweepStep::CaughtUp { .. } = self.run_once(job).await? {
                return self.progress(&job.id).await;
            }
        }
    }

    /// Sweep `jobs` concurrently until `shutdown` turns true
    ///
    /// Jobs must have distinct ids and disjoint ranges. Transient failures
    /// back off and retry; any other failure stops the run.
    pub async fn run(&self, jobs: Vec<SweepJob>, shutdown: watch::Receiver<bool>) -> Result<()> {
        validate_disjoint(&jobs)?;
        {
            let mut state = self.state.write();
            if *state == ServiceState::Running {
                return Err(KairosError::invalid("sweep service already running"));
            }
            *state = ServiceState::Running;
        }
        tracing::info!(jobs = jobs.len(), "sweep service started");

        let loops = jobs.iter().map(|job| self.run_job(job, shutdown.clone()));
        let outcome = futures::future::try_join_all(loops).await;

        *self.state.write() = if outcome.is_ok() {
            ServiceState::Stopped
        } else {
            ServiceState::Failed
        };
        self.metrics.report();
        outcome.map(|_| ())
    }

    async fn run_job(&self, job: &SweepJob, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            let stop = *shutdown.borrow();
            if stop {
                tracing::debug!(job = %job.id, "sweep job stopping");
                return Ok(());
            }

            let idle = match self.run_once(job).await {
                Ok(SweepStep::CaughtUp { .. }) => true,
                Ok(_) => false,
                Err(err) if err.is_retryable() => {
                    self.metrics.record_failure();
                    tracing::warn!(job = %job.id, error = %err, "sweep iteration failed, backing off");
                    true
                }
                Err(err) => {
                    self.metrics.record_failure();
                    tracing::error!(job = %job.id, error = %err, "sweep job stopped");
                    return Err(err);
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_backoff) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Live counters
    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Whether [`SweepService::run`] is active
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Active configuration
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }
}
