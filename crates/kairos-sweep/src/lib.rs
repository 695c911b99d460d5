//! # Kairos Sweep - Bounded, Resumable Garbage Sweep
//!
//! **Purpose**: Remove cell versions that no reader can observe any more,
//! in bounded batches that can be resumed from a persisted marker after a
//! crash or restart.
//!
//! - [`SweepCursor`]: builds one batch strictly after a resume marker,
//!   stopping on a whole-cell boundary once the size bound is reached
//! - [`pages`]: lazy stream over any [`PageSource`]
//! - [`SweepService`]: per-job loop of watermark, batch, apply, persist
//! - [`CoalescedWatermark`] and [`IssuedLagWatermark`]: watermark providers
//!
//! ## Coverage
//!
//! Feeding each batch's `last_cell_examined` into the next call visits every
//! cell of a job's range exactly once per pass. Versions at or above the
//! watermark are never touched.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod cursor;
pub mod job;
pub mod metrics;
pub mod page;
pub mod policy;
pub mod service;
pub mod sink;
pub mod watermark;

pub use config::SweepConfig;
pub use cursor::SweepCursor;
pub use job::{
    discover_jobs, validate_disjoint, CursorStateStore, FileCursorStore, MemoryCursorStore,
    SweepJob, SweepProgress, SweepTotals,
};
pub use metrics::{SweepMetrics, SweepMetricsSnapshot};
pub use page::{pages, CellPageSource, ListingPageSource, PageSource};
pub use policy::SweepPolicy;
pub use service::{ServiceState, SweepService, SweepStep};
pub use sink::{HistorySink, SweepSink};
pub use watermark::{IssuedLagWatermark, CoalescedWatermark, WatermarkQuery};
