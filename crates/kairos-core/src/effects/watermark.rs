//! Source of the safe-to-sweep threshold

use crate::errors::Result;
use crate::types::Timestamp;
use async_trait::async_trait;
use std::sync::Arc;

/// Provides the timestamp below which versions are safe to remove
#[async_trait]
pub trait WatermarkProvider: Send + Sync {
    /// Current sweep watermark
    async fn sweep_watermark(&self) -> Result<Timestamp>;
}

#[async_trait]
impl<T: WatermarkProvider + ?Sized> WatermarkProvider for Arc<T> {
    async fn sweep_watermark(&self) -> Result<Timestamp> {
        (**self).sweep_watermark().await
    }
}

/// A watermark pinned to a constant value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWatermark(pub Timestamp);

#[async_trait]
impl WatermarkProvider for FixedWatermark {
    async fn sweep_watermark(&self) -> Result<Timestamp> {
        Ok(self.0)
    }
}
