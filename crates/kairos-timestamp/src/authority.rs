//! Timestamp authority: hands out disjoint, increasing timestamp ranges

use crate::config::TimestampConfig;
use crate::store::FencedBoundStore;
use kairos_core::config::ConfigValidation;
use kairos_core::effects::BoundBackend;
use kairos_core::{Bound, KairosError, Result, Timestamp, TimestampRange};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
struct Allocation {
    /// Next timestamp to hand out
    next: Timestamp,
    /// Limit persisted in the bound store; `next` never passes it
    limit: Bound,
}

/// Issues timestamps from the bound held by one [`FencedBoundStore`]
///
/// Ranges are handed out strictly after the persisted bound observed at
/// construction. Before a range that would cross the persisted limit is
/// returned, the limit is raised to the range end plus the configured
/// headroom, so a successor authority always starts above every issued
/// timestamp.
pub struct TimestampAuthority<B> {
    store: Arc<FencedBoundStore<B>>,
    config: TimestampConfig,
    allocation: Mutex<Allocation>,
}

impl<B: BoundBackend> TimestampAuthority<B> {
    /// Start issuing from the store's current upper limit
    pub async fn new(store: Arc<FencedBoundStore<B>>, config: TimestampConfig) -> Result<Self> {
        config.validate()?;
        let limit = store.upper_limit().await?;
        tracing::info!(
            authority = %store.authority(),
            start = limit.value(),
            headroom = config.allocation_headroom,
            "timestamp authority ready"
        );
        Ok(Self {
            store,
            config,
            allocation: Mutex::new(Allocation {
                next: limit.first_unallocated(),
                limit,
            }),
        })
    }

    /// One fresh timestamp
    pub async fn fresh_timestamp(&self) -> Result<Timestamp> {
        Ok(self.fresh_timestamps(1).await?.start)
    }

    /// A block of `count` fresh timestamps
    pub async fn fresh_timestamps(&self, count: u64) -> Result<TimestampRange> {
        self.check_request(count)?;
        self.reserve(count).await
    }

    /// Reject a request size before any shared state is touched
    pub fn check_request(&self, count: u64) -> Result<()> {
        if count == 0 {
            return Err(KairosError::invalid("timestamp count must be positive"));
        }
        if count > self.config.max_timestamps_per_request {
            return Err(KairosError::invalid(format!(
                "requested {count} timestamps, at most {} allowed per request",
                self.config.max_timestamps_per_request
            )));
        }
        Ok(())
    }

    /// Allocate `count` timestamps without the per-request cap
    pub(crate) async fn reserve(&self, count: u64) -> Result<TimestampRange> {
        self.store.ensure_active()?;
        let mut allocation = self.allocation.lock().await;

        let end = Bound(allocation.next.value()).checked_add(count)?;
        if end > allocation.limit {
            let target = end
                .checked_add(self.config.allocation_headroom)
                .unwrap_or(end);
            self.store.store_upper_limit(target).await?;
            tracing::debug!(
                authority = %self.store.authority(),
                previous = allocation.limit.value(),
                limit = target.value(),
                "extended persisted timestamp limit"
            );
            allocation.limit = target;
        }

        let range = TimestampRange::new(allocation.next, end.first_unallocated())?;
        allocation.next = range.end;
        Ok(range)
    }

    /// First timestamp not yet handed out
    ///
    /// Every issued timestamp lies below it. The persisted limit sits up to
    /// `allocation_headroom` above, over timestamps still to be issued.
    pub async fn next_timestamp(&self) -> Result<Timestamp> {
        self.store.ensure_active()?;
        Ok(self.allocation.lock().await.next)
    }

    /// Upper limit currently persisted in the bound store
    pub async fn current_upper_limit(&self) -> Result<Bound> {
        self.store.upper_limit().await
    }

    /// The fenced store this authority draws from
    pub fn store(&self) -> &Arc<FencedBoundStore<B>> {
        &self.store
    }

    /// Configuration in use
    pub fn config(&self) -> &TimestampConfig {
        &self.config
    }
}
