//! # Kairos Batch - Request Coalescing
//!
//! **Purpose**: Collapse thundering-herd duplicate work into one backend round
//! trip while every logical caller still receives exactly one result.
//!
//! A [`Coalescer`] sits in front of any [`BatchFunction`]. Concurrent equal
//! requests share one in-flight call; distinct requests arriving within the
//! formation window share one batched call.
//!
//! ```rust,no_run
//! use kairos_batch::{respond_each, Coalescer, CoalescerConfig};
//!
//! # async fn example() -> kairos_core::Result<()> {
//! let lookup: Coalescer<String, usize> = Coalescer::from_fn(
//!     |names: Vec<String>| async move { respond_each(names, |n| Ok(n.len())) },
//!     CoalescerConfig::default(),
//! );
//! let len = lookup.submit("watermark".to_string()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// The coalescer and its pending-request table
pub mod coalescer;

/// Batch formation policy
pub mod config;

/// The batched operation trait and closure adapters
pub mod function;

pub use coalescer::{Coalescer, CoalescerStatsSnapshot};
pub use config::CoalescerConfig;
pub use function::{batch_fn, respond_each, BatchFunction, FnBatch};
