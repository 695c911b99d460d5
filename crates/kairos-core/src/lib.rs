//! # Kairos Core - Foundation Types
//!
//! **Purpose**: Shared vocabulary for the timestamp authority, the request
//! coalescer and the sweep machinery.
//!
//! - **Types**: [`Bound`], [`Timestamp`], [`FencingToken`], [`Cell`], [`SweepBatch`]
//! - **Errors**: one [`KairosError`] with retry and fatality classification
//! - **Effects**: traits for the collaborators the core consumes (bound record,
//!   cell history scan, watermark source)
//! - **Reliability**: retry with backoff for transient backend failures
//! - **Config**: validation and file loading shared by component configs
//!
//! ## What's NOT in this crate
//!
//! - Fencing and allocation logic (`kairos-timestamp`)
//! - Request coalescing (`kairos-batch`)
//! - Sweep cursors and the maintenance loop (`kairos-sweep`)
//! - In-memory handlers (`kairos-testkit`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Cell addressing and sweep batch types
pub mod cell;

/// Configuration validation and loading
pub mod config;

/// Opaque authorization context
pub mod context;

/// Collaborator traits
pub mod effects;

/// Unified error type
pub mod errors;

/// Retry with backoff
pub mod reliability;

/// Timestamp, bound and authority identity types
pub mod types;

pub use cell::{Cell, CellHistoryEntry, CellToSweep, CellVersion, KeyRange, SweepBatch};
pub use config::{load_config_file, ConfigValidation, ConfigValidator};
pub use context::AccessContext;
pub use errors::{KairosError, Result};
pub use reliability::{BackoffStrategy, RetryPolicy};
pub use types::{AuthorityId, Bound, FencingToken, StoredBound, Timestamp, TimestampRange};
