//! In-memory bound record with atomic compare-and-swap

use crate::faults::FaultInjector;
use async_trait::async_trait;
use kairos_core::effects::{BoundBackend, CasOutcome};
use kairos_core::{AuthorityId, Bound, FencingToken, Result, StoredBound};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared in-memory bound record
///
/// Clones point at the same record, so several authorities built from clones
/// contend exactly as they would against one remote store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBoundBackend {
    record: Arc<RwLock<Option<StoredBound>>>,
    faults: FaultInjector,
    commits: Arc<AtomicU64>,
}

impl MemoryBoundBackend {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `bound` and owned by no authority
    pub fn seeded(bound: u64) -> Self {
        Self::with_record(StoredBound {
            bound: Bound(bound),
            token: FencingToken(0),
            authority: AuthorityId::from_u128(0),
        })
    }

    /// Create a store holding `record`
    pub fn with_record(record: StoredBound) -> Self {
        Self {
            record: Arc::new(RwLock::new(Some(record))),
            ..Self::default()
        }
    }

    /// Fault schedule applied to every read and write
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Current record, bypassing fault injection
    pub async fn snapshot(&self) -> Option<StoredBound> {
        *self.record.read().await
    }

    /// Overwrite the record unconditionally, simulating an out-of-band writer
    pub async fn force(&self, record: StoredBound) {
        *self.record.write().await = Some(record);
    }

    /// Number of successful compare-and-swap writes
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BoundBackend for MemoryBoundBackend {
    async fn read(&self) -> Result<Option<StoredBound>> {
        self.faults.check("bound.read")?;
        Ok(*self.record.read().await)
    }

    async fn compare_and_swap(
        &self,
        expected: Option<StoredBound>,
        new: StoredBound,
    ) -> Result<CasOutcome> {
        self.faults.check("bound.compare_and_swap")?;
        let mut record = self.record.write().await;
        if *record != expected {
            return Ok(CasOutcome::Conflict { actual: *record });
        }
        *record = Some(new);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(CasOutcome::Committed)
    }
}
