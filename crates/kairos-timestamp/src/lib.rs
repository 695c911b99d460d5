//! # Kairos Timestamp - Fenced Bound Store and Timestamp Authority
//!
//! **Purpose**: Hand out strictly increasing timestamps to many concurrent
//! transaction coordinators while guaranteeing that at most one authority
//! instance can advance the persisted bound at a time.
//!
//! - [`FencedBoundStore`]: the persisted bound, guarded by a fencing token
//!   that every write is conditioned on
//! - [`TimestampAuthority`]: allocates disjoint ranges below the persisted
//!   limit, raising the limit before crossing it
//! - [`TimestampService`]: coalesces concurrent allocation and upper-limit
//!   requests into single backend round trips
//!
//! ## Failure model
//!
//! Fencing violations and bound regressions are fatal to the instance that
//! observes them: the store moves to [`AuthorityState::Fenced`] and every
//! later call fails with the same error. An operator or supervisor must
//! acquire a fresh authority.
//!
//! ```rust,no_run
//! use kairos_core::{AuthorityId, RetryPolicy};
//! use kairos_testkit::MemoryBoundBackend;
//! use kairos_timestamp::{FencedBoundStore, TimestampAuthority, TimestampConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> kairos_core::Result<()> {
//! let store = FencedBoundStore::acquire(
//!     MemoryBoundBackend::seeded(100),
//!     AuthorityId::new(),
//!     RetryPolicy::default(),
//! )
//! .await?;
//! let authority = TimestampAuthority::new(Arc::new(store), TimestampConfig::default()).await?;
//! let range = authority.fresh_timestamps(10).await?;
//! assert_eq!(range.start.value(), 100);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod service;
pub mod store;

pub use authority::TimestampAuthority;
pub use config::TimestampConfig;
pub use service::{AllocationRequest, TimestampService, UpperLimitQuery};
pub use store::{AuthorityState, FencedBoundStore};
