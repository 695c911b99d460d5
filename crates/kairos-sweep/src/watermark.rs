//! Watermark providers for the sweep service

use async_trait::async_trait;
use kairos_batch::{BatchFunction, Coalescer, CoalescerConfig};
use kairos_core::effects::{BoundBackend, WatermarkProvider};
use kairos_core::{Result, Timestamp};
use kairos_timestamp::TimestampAuthority;
use std::collections::HashMap;
use std::sync::Arc;

/// Key shared by every watermark reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatermarkQuery;

struct WatermarkBatch {
    provider: Arc<dyn WatermarkProvider>,
}

#[async_trait]
impl BatchFunction<WatermarkQuery, Timestamp> for WatermarkBatch {
    async fn apply(
        &self,
        requests: Vec<WatermarkQuery>,
    ) -> Result<HashMap<WatermarkQuery, Result<Timestamp>>> {
        let watermark = self.provider.sweep_watermark().await?;
        Ok(requests.into_iter().map(|q| (q, Ok(watermark))).collect())
    }
}

/// Shares one upstream lookup among concurrent readers
///
/// Sweep jobs running side by side ask for the watermark at roughly the same
/// moment at the top of every iteration. Wrapping the provider keeps that to
/// one upstream call per formation window.
#[derive(Clone)]
pub struct CoalescedWatermark {
    lookups: Coalescer<WatermarkQuery, Timestamp>,
}

impl CoalescedWatermark {
    /// Coalesce lookups against `provider`
    pub fn new(provider: Arc<dyn WatermarkProvider>, config: CoalescerConfig) -> Self {
        Self {
            lookups: Coalescer::new(WatermarkBatch { provider }, config),
        }
    }

    /// Upstream calls issued so far
    pub fn upstream_calls(&self) -> u64 {
        self.lookups.stats().batches
    }
}

#[async_trait]
impl WatermarkProvider for CoalescedWatermark {
    async fn sweep_watermark(&self) -> Result<Timestamp> {
        self.lookups.submit(WatermarkQuery).await
    }
}

/// Watermark trailing the authority's next unissued timestamp by a fixed lag
///
/// Every timestamp handed out lies below the next unissued one, so that value
/// minus a lag long enough to outlive open transactions is a safe threshold.
/// The persisted bound is not used: it runs ahead by the allocation headroom.
pub struct IssuedLagWatermark<B> {
    authority: Arc<TimestampAuthority<B>>,
    lag: u64,
}

impl<B: BoundBackend> IssuedLagWatermark<B> {
    /// Trail `authority` by `lag` ticks
    pub fn new(authority: Arc<TimestampAuthority<B>>, lag: u64) -> Self {
        Self { authority, lag }
    }
}

#[async_trait]
impl<B: BoundBackend> WatermarkProvider for IssuedLagWatermark<B> {
    async fn sweep_watermark(&self) -> Result<Timestamp> {
        let next = self.authority.next_timestamp().await?;
        Ok(next.saturating_sub(self.lag))
    }
}
