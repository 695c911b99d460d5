//! Coalescer tuning

use kairos_core::config::{duration_ms, ConfigValidation, ConfigValidator};
use kairos_core::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batch formation policy
///
/// Neither field affects correctness. The window trades latency for larger
/// batches; the size cap bounds the work handed to one backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// How long a forming batch waits for more callers before dispatch
    #[serde(with = "duration_ms", rename = "window_ms")]
    pub window: Duration,
    /// Maximum distinct requests handed to one backend call
    pub max_batch_size: usize,
}

impl CoalescerConfig {
    /// Dispatch as soon as the submitting task yields
    pub fn immediate() -> Self {
        Self {
            window: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the formation window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the per-call size cap
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1),
            max_batch_size: 1024,
        }
    }
}

impl ConfigValidation for CoalescerConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::section("coalescer")
            .positive("max_batch_size", self.max_batch_size as u64)
            .in_range("window_ms", self.window.as_millis() as u64, 0, 60_000)
            .finish()
    }
}
