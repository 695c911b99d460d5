//! Coalesced front end to the timestamp authority
//!
//! Many coordinators call in concurrently. Allocation requests arriving in
//! one formation window are served by a single range reservation that is
//! split among them in arrival order; concurrent upper-limit reads share a
//! single backend read.

use crate::authority::TimestampAuthority;
use async_trait::async_trait;
use kairos_batch::{BatchFunction, Coalescer, CoalescerStatsSnapshot};
use kairos_core::effects::BoundBackend;
use kairos_core::{Bound, KairosError, Result, Timestamp, TimestampRange};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One caller's request for a block of timestamps
///
/// Each request carries a unique id, so two callers asking for the same
/// count are never folded into one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationRequest {
    id: u64,
    count: u64,
}

/// Key shared by every reader of the upper limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpperLimitQuery;

struct AllocationBatch<B> {
    authority: Arc<TimestampAuthority<B>>,
}

#[async_trait]
impl<B: BoundBackend + 'static> BatchFunction<AllocationRequest, TimestampRange>
    for AllocationBatch<B>
{
    async fn apply(
        &self,
        requests: Vec<AllocationRequest>,
    ) -> Result<HashMap<AllocationRequest, Result<TimestampRange>>> {
        let total = requests
            .iter()
            .try_fold(0u64, |sum, r| sum.checked_add(r.count))
            .ok_or_else(|| KairosError::invalid("batched allocation overflows"))?;
        let block = self.authority.reserve(total).await?;

        let mut next = block.start;
        let mut ranges = HashMap::with_capacity(requests.len());
        for request in requests {
            let end = Timestamp(next.value() + request.count);
            ranges.insert(request, TimestampRange::new(next, end));
            next = end;
        }
        tracing::debug!(requests = ranges.len(), block = %block, "served coalesced allocation");
        Ok(ranges)
    }

    fn validate(&self, request: &AllocationRequest) -> Result<()> {
        self.authority.check_request(request.count)
    }
}

struct UpperLimitBatch<B> {
    authority: Arc<TimestampAuthority<B>>,
}

#[async_trait]
impl<B: BoundBackend + 'static> BatchFunction<UpperLimitQuery, Bound> for UpperLimitBatch<B> {
    async fn apply(
        &self,
        requests: Vec<UpperLimitQuery>,
    ) -> Result<HashMap<UpperLimitQuery, Result<Bound>>> {
        let limit = self.authority.current_upper_limit().await?;
        Ok(requests.into_iter().map(|q| (q, Ok(limit))).collect())
    }
}

/// Timestamp service shared by all coordinators in a process
pub struct TimestampService<B> {
    authority: Arc<TimestampAuthority<B>>,
    allocations: Coalescer<AllocationRequest, TimestampRange>,
    limits: Coalescer<UpperLimitQuery, Bound>,
    next_request: AtomicU64,
}

impl<B: BoundBackend + 'static> TimestampService<B> {
    /// Put coalescers configured from the authority's config in front of it
    pub fn new(authority: Arc<TimestampAuthority<B>>) -> Self {
        let config = authority.config().coalescer.clone();
        Self {
            allocations: Coalescer::new(
                AllocationBatch {
                    authority: Arc::clone(&authority),
                },
                config.clone(),
            ),
            limits: Coalescer::new(
                UpperLimitBatch {
                    authority: Arc::clone(&authority),
                },
                config,
            ),
            authority,
            next_request: AtomicU64::new(0),
        }
    }

    /// A block of `count` fresh timestamps
    pub async fn fresh_timestamps(&self, count: u64) -> Result<TimestampRange> {
        let request = AllocationRequest {
            id: self.next_request.fetch_add(1, Ordering::Relaxed),
            count,
        };
        self.allocations.submit(request).await
    }

    /// One fresh timestamp
    pub async fn fresh_timestamp(&self) -> Result<Timestamp> {
        Ok(self.fresh_timestamps(1).await?.start)
    }

    /// Persisted upper limit, shared across concurrent readers
    pub async fn current_upper_limit(&self) -> Result<Bound> {
        self.limits.submit(UpperLimitQuery).await
    }

    /// The authority behind the service
    pub fn authority(&self) -> &Arc<TimestampAuthority<B>> {
        &self.authority
    }

    /// Coalescing counters for allocations
    pub fn allocation_stats(&self) -> CoalescerStatsSnapshot {
        self.allocations.stats()
    }

    /// Coalescing counters for upper-limit reads
    pub fn upper_limit_stats(&self) -> CoalescerStatsSnapshot {
        self.limits.stats()
    }
}
