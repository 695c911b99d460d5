//! Kairos Testing Infrastructure
//!
//! In-memory implementations of the collaborator traits in
//! `kairos_core::effects`, each with fault injection, plus fixtures, proptest
//! strategies and a tracing initializer for tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! Add this to your crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! kairos-testkit = { path = "../kairos-testkit" }
//! ```
//!
//! Then in your tests:
//! ```rust,no_run
//! use kairos_testkit::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_test_tracing();
//!     let store = MemoryCellStore::new();
//!     store.put(cell(1), 10);
//!     // ... test logic
//! }
//! ```

pub mod bound;
pub mod faults;
pub mod fixtures;
pub mod history;
pub mod strategies;
pub mod watermark;

pub use bound::MemoryBoundBackend;
pub use faults::FaultInjector;
pub use fixtures::*;
pub use history::{MemoryCellStore, RowPrefix};
pub use watermark::ManualWatermark;

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Another harness may already own the global subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install a test-friendly tracing subscriber once per process
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_tracing() {
    Lazy::force(&TRACING);
}
