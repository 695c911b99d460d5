//! Settable watermark source that counts lookups

use crate::faults::FaultInjector;
use async_trait::async_trait;
use kairos_core::effects::WatermarkProvider;
use kairos_core::{Result, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Watermark a test can move forward by hand
#[derive(Debug, Clone, Default)]
pub struct ManualWatermark {
    value: Arc<AtomicU64>,
    lookups: Arc<AtomicU64>,
    latency: Duration,
    faults: FaultInjector,
}

impl ManualWatermark {
    /// Start at `value`
    pub fn new(value: u64) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(value)),
            ..Self::default()
        }
    }

    /// Delay every lookup by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Move the watermark
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Number of lookups served
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Fault schedule applied to lookups
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

#[async_trait]
impl WatermarkProvider for ManualWatermark {
    async fn sweep_watermark(&self) -> Result<Timestamp> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.faults.check("watermark.lookup")?;
        Ok(Timestamp(self.value.load(Ordering::SeqCst)))
    }
}
