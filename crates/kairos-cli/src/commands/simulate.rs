//! `kairos simulate` - exercise the whole stack against in-memory backends
//!
//! Many coordinators allocate timestamps concurrently through the coalesced
//! service, the allocated timestamps are written as cell versions, and the
//! sweep service then walks the cells in disjoint jobs. The report states
//! whether every allocated range was disjoint and whether the sweep left
//! exactly the versions the policy keeps.

use crate::config::NodeConfig;
use anyhow::{bail, Result};
use clap::Args;
use futures::future::try_join_all;
use kairos_core::effects::WatermarkProvider;
use kairos_core::{AuthorityId, KairosError, KeyRange, Timestamp, TimestampRange};
use kairos_sweep::{
    IssuedLagWatermark, CoalescedWatermark, CursorStateStore, FileCursorStore, MemoryCursorStore,
    SweepJob, SweepMetricsSnapshot, SweepPolicy, SweepService,
};
use kairos_testkit::{cell, MemoryBoundBackend, MemoryCellStore};
use kairos_timestamp::{FencedBoundStore, TimestampAuthority, TimestampService};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments for `kairos simulate`
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Concurrent transaction coordinators
    #[arg(long, default_value = "8")]
    pub coordinators: usize,

    /// Allocation requests issued by each coordinator
    #[arg(long, default_value = "100")]
    pub requests: usize,

    /// Cells written and then swept
    #[arg(long, default_value = "1000")]
    pub cells: u32,

    /// Versions written per cell
    #[arg(long, default_value = "3")]
    pub versions: usize,

    /// Sweep jobs the cells are split into
    #[arg(long, default_value = "4")]
    pub jobs: u32,

    /// Config file; defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Outcome of one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Coordinators that allocated concurrently
    pub coordinators: usize,
    /// Ranges handed out
    pub ranges: usize,
    /// Timestamps handed out across all ranges
    pub timestamps_allocated: u64,
    /// No two ranges shared a timestamp
    pub ranges_disjoint: bool,
    /// Backend reservations the coalescer issued for all requests
    pub allocation_calls: u64,
    /// Bound persisted at the end of the run
    pub persisted_bound: u64,
    /// Watermark the sweep ran against, trailing the next unissued timestamp
    pub watermark: u64,
    /// Cells written
    pub cells: u32,
    /// Versions present before sweeping
    pub versions_before: usize,
    /// Versions left after sweeping
    pub versions_after: usize,
    /// Every cell holds exactly the versions the policy keeps
    pub cells_covered: bool,
    /// Sweep counters
    pub sweep: SweepMetricsSnapshot,
}

/// Handle `kairos simulate`
pub async fn handle_simulate_command(args: SimulateArgs) -> Result<()> {
    let config = NodeConfig::load(args.config.as_deref())?;
    let report = run_simulation(&args, &config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.ranges_disjoint {
        bail!("allocated timestamp ranges overlap");
    }
    if !report.cells_covered {
        bail!("sweep left unexpected versions behind");
    }
    Ok(())
}

/// Run one simulation with `config`
pub async fn run_simulation(args: &SimulateArgs, config: &NodeConfig) -> Result<SimulationReport> {
    if args.coordinators == 0 || args.requests == 0 || args.cells == 0 || args.jobs == 0 {
        bail!("coordinators, requests, cells and jobs must all be positive");
    }

    // Allocation
    let backend = MemoryBoundBackend::new();
    let store = Arc::new(
        FencedBoundStore::acquire(backend.clone(), AuthorityId::new(), config.timestamp.retry.clone())
            .await?,
    );
    let authority = Arc::new(TimestampAuthority::new(store.clone(), config.timestamp.clone()).await?);
    let timestamps = TimestampService::new(authority.clone());

    let coordinator_runs = (0..args.coordinators).map(|coordinator| {
        let timestamps = &timestamps;
        async move {
            let mut ranges = Vec::with_capacity(args.requests);
            for request in 0..args.requests {
                let count = 1 + ((coordinator + request) % 4) as u64;
                ranges.push(timestamps.fresh_timestamps(count).await?);
            }
            Ok::<_, KairosError>(ranges)
        }
    });
    let mut ranges: Vec<TimestampRange> = try_join_all(coordinator_runs)
        .await?
        .into_iter()
        .flatten()
        .collect();
    ranges.sort_by_key(|range| range.start);
    let ranges_disjoint = ranges.windows(2).all(|pair| pair[0].end <= pair[1].start);
    let allocated: Vec<u64> = ranges.iter().flat_map(|r| r.iter()).map(Timestamp::value).collect();
    tracing::info!(
        ranges = ranges.len(),
        timestamps = allocated.len(),
        disjoint = ranges_disjoint,
        "allocation finished"
    );

    if args.versions > allocated.len() {
        bail!(
            "{} versions per cell needs at least that many allocated timestamps, got {}",
            args.versions,
            allocated.len()
        );
    }

    // History
    let history = MemoryCellStore::new();
    let mut written: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
    for index in 1..=args.cells {
        let base = (index as usize - 1) * args.versions;
        let mut versions: Vec<u64> = (0..args.versions)
            .map(|v| allocated[(base + v) % allocated.len()])
            .collect();
        versions.sort_unstable();
        for ts in &versions {
            history.put(cell(index), *ts);
        }
        written.insert(index, versions);
    }
    let versions_before = history.version_count();

    // Sweep
    let lagging: Arc<dyn WatermarkProvider> =
        Arc::new(IssuedLagWatermark::new(authority, config.sweep.watermark_lag));
    let watermark = Arc::new(CoalescedWatermark::new(lagging, config.watermark.clone()));
    let cursors: Arc<dyn CursorStateStore> = match &config.cursor_dir {
        Some(dir) => Arc::new(FileCursorStore::open(dir.clone()).await?),
        None => Arc::new(MemoryCursorStore::new()),
    };
    let sweep = SweepService::new(
        Arc::new(history.clone()),
        watermark.clone(),
        cursors,
        config.sweep.clone(),
    )?;

    let jobs = split_jobs(args.cells, args.jobs)?;
    try_join_all(jobs.iter().map(|job| sweep.run_until_caught_up(job))).await?;
    sweep.metrics().report();

    let threshold = watermark.sweep_watermark().await?.value();
    let cells_covered = written.iter().all(|(index, versions)| {
        let expected = retained(versions, threshold, config.sweep.policy);
        let actual: Vec<u64> = history
            .versions(&cell(*index))
            .iter()
            .map(|v| v.timestamp.value())
            .collect();
        actual == expected
    });

    Ok(SimulationReport {
        coordinators: args.coordinators,
        ranges: ranges.len(),
        timestamps_allocated: allocated.len() as u64,
        ranges_disjoint,
        allocation_calls: timestamps.allocation_stats().batches,
        persisted_bound: store.upper_limit().await?.value(),
        watermark: threshold,
        cells: args.cells,
        versions_before,
        versions_after: history.version_count(),
        cells_covered,
        sweep: sweep.metrics().snapshot(),
    })
}

/// Contiguous, disjoint jobs covering cells `1..=cells`
fn split_jobs(cells: u32, jobs: u32) -> Result<Vec<SweepJob>> {
    let chunk = cells.div_ceil(jobs).max(1);
    let split = (0..jobs)
        .map(|k| {
            let start = (k > 0).then(|| cell(1 + k * chunk));
            let end = (k + 1 < jobs).then(|| cell(1 + (k + 1) * chunk));
            SweepJob::new(format!("sim-{k}"), KeyRange::new(start, end))
        })
        .collect::<kairos_core::Result<Vec<_>>>()?;
    Ok(split)
}

/// Versions of a cell the policy leaves in place at `watermark`
fn retained(versions: &[u64], watermark: u64, policy: SweepPolicy) -> Vec<u64> {
    let newest_below = versions.iter().copied().filter(|ts| *ts < watermark).max();
    versions
        .iter()
        .copied()
        .filter(|ts| {
            *ts >= watermark
                || (policy == SweepPolicy::Conservative && Some(*ts) == newest_below)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cells: u32) -> SimulateArgs {
        SimulateArgs {
            coordinators: 4,
            requests: 10,
            cells,
            versions: 3,
            jobs: 3,
            config: None,
        }
    }

    fn without_lag() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.sweep.watermark_lag = 0;
        config
    }

    #[tokio::test]
    async fn test_simulation_allocates_disjoint_ranges_and_covers_cells() {
        let report = run_simulation(&args(50), &without_lag()).await.unwrap();

        assert!(report.ranges_disjoint);
        assert!(report.cells_covered);
        assert_eq!(report.ranges, 40);
        assert_eq!(report.versions_before, 150);
        assert_eq!(report.versions_after, 50);
        assert!(report.allocation_calls <= 40);
        assert!(report.persisted_bound >= report.timestamps_allocated);
        assert_eq!(report.watermark, report.timestamps_allocated);
    }

    #[tokio::test]
    async fn test_default_lag_keeps_recent_versions() {
        let report = run_simulation(&args(50), &NodeConfig::default()).await.unwrap();

        assert!(report.cells_covered);
        assert_eq!(report.watermark, 0);
        assert_eq!(report.versions_after, report.versions_before);
    }

    #[tokio::test]
    async fn test_thorough_simulation_with_file_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig {
            cursor_dir: Some(dir.path().to_path_buf()),
            ..without_lag()
        };
        config.sweep.policy = SweepPolicy::Thorough;
        config.sweep.batch_size = 7;

        let report = run_simulation(&args(20), &config).await.unwrap();
        assert!(report.cells_covered);
        assert_eq!(report.versions_after, 0);
        assert!(dir.path().join("sim-0.json").exists());
    }

    #[test]
    fn test_jobs_partition_the_cells() {
        let jobs = split_jobs(10, 3).unwrap();
        assert_eq!(jobs.len(), 3);
        for index in 1..=10 {
            let owners = jobs.iter().filter(|j| j.range.contains(&cell(index))).count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn test_retained_versions_per_policy() {
        assert_eq!(retained(&[1, 5, 9], 6, SweepPolicy::Conservative), vec![5, 9]);
        assert_eq!(retained(&[1, 5, 9], 6, SweepPolicy::Thorough), vec![9]);
    }

    #[tokio::test]
    async fn test_zero_coordinators_rejected() {
        let mut bad = args(5);
        bad.coordinators = 0;
        assert!(run_simulation(&bad, &NodeConfig::default()).await.is_err());
    }
}
