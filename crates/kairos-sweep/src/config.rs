//! Sweep configuration

use crate::policy::SweepPolicy;
use kairos_core::config::{duration_ms, ConfigValidation, ConfigValidator};
use kairos_core::{Result, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the sweep cursor and the background service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Cell-timestamp pairs examined per batch
    pub batch_size: u64,
    /// Cells requested per history scan
    pub page_size: usize,
    /// Pause after a job catches up with the watermark
    #[serde(with = "duration_ms", rename = "idle_backoff_ms")]
    pub idle_backoff: Duration,
    /// Which versions below the watermark are removed
    pub policy: SweepPolicy,
    /// Ticks the derived watermark trails the next unissued timestamp by
    pub watermark_lag: u64,
    /// Retry policy for scans and deletes
    pub retry: RetryPolicy,
}

impl SweepConfig {
    /// Set the batch size bound
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the scan page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the sweep policy
    pub fn with_policy(mut self, policy: SweepPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the idle backoff
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            page_size: 256,
            idle_backoff: Duration::from_secs(5),
            policy: SweepPolicy::default(),
            watermark_lag: 1_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConfigValidation for SweepConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::section("sweep")
            .positive("batch_size", self.batch_size)
            .in_range("page_size", self.page_size as u64, 1, 100_000)
            .finish()?;
        self.retry.validate()
    }
}
