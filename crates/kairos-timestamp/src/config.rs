//! Timestamp authority configuration

use kairos_batch::CoalescerConfig;
use kairos_core::config::{ConfigValidation, ConfigValidator};
use kairos_core::{Result, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Tuning for the timestamp authority and its request coalescing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Extra timestamps reserved beyond each allocation when the persisted
    /// limit must grow, so most allocations need no backend write
    pub allocation_headroom: u64,
    /// Largest block a single caller may request
    pub max_timestamps_per_request: u64,
    /// Retry policy for transient bound-store failures
    pub retry: RetryPolicy,
    /// Batching of concurrent allocation and upper-limit requests
    pub coalescer: CoalescerConfig,
}

impl TimestampConfig {
    /// Persist exactly the allocated end on every limit extension
    pub fn without_headroom() -> Self {
        Self {
            allocation_headroom: 0,
            ..Self::default()
        }
    }

    /// Set the allocation headroom
    pub fn with_headroom(mut self, headroom: u64) -> Self {
        self.allocation_headroom = headroom;
        self
    }

    /// Set the retry policy for bound-store calls
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            allocation_headroom: 10_000,
            max_timestamps_per_request: 100_000,
            retry: RetryPolicy::default(),
            coalescer: CoalescerConfig::default(),
        }
    }
}

impl ConfigValidation for TimestampConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::section("timestamp")
            .positive("max_timestamps_per_request", self.max_timestamps_per_request)
            .check(
                "allocation_headroom",
                self.allocation_headroom.checked_add(self.max_timestamps_per_request).is_some(),
                "headroom plus request size overflows",
            )
            .finish()?;
        self.retry.validate()?;
        self.coalescer.validate()
    }
}
