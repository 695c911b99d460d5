//! Conditional-write access to the persisted bound record

use crate::errors::Result;
use crate::types::StoredBound;
use async_trait::async_trait;
use std::sync::Arc;

/// Outcome of a compare-and-swap against the bound record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The new record was written
    Committed,
    /// The stored record differed from the expected one; nothing was written
    Conflict {
        /// Record found in the store (`None` if absent)
        actual: Option<StoredBound>,
    },
}

/// Backing store for the single bound record
///
/// Every write is conditional. An implementation must compare the whole
/// record (bound, token and authority) atomically with the swap.
#[async_trait]
pub trait BoundBackend: Send + Sync {
    /// Read the current record, `None` before the first authority acquires it
    async fn read(&self) -> Result<Option<StoredBound>>;

    /// Replace `expected` with `new` if and only if the store still holds `expected`
    async fn compare_and_swap(
        &self,
        expected: Option<StoredBound>,
        new: StoredBound,
    ) -> Result<CasOutcome>;
}

#[async_trait]
impl<T: BoundBackend + ?Sized> BoundBackend for Arc<T> {
    async fn read(&self) -> Result<Option<StoredBound>> {
        (**self).read().await
    }

    async fn compare_and_swap(
        &self,
        expected: Option<StoredBound>,
        new: StoredBound,
    ) -> Result<CasOutcome> {
        (**self).compare_and_swap(expected, new).await
    }
}
