//! Scripted failures for in-memory backends

use kairos_core::{KairosError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FaultState {
    remaining: u32,
    error: Option<KairosError>,
    injected: u64,
}

/// Fails the next N operations with a chosen error
///
/// Clones share state, so a test can keep a handle while the backend owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<Mutex<FaultState>>,
}

impl FaultInjector {
    /// Create an injector with no faults scheduled
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with `error`
    pub fn fail_next(&self, count: u32, error: KairosError) {
        let mut state = self.state.lock();
        state.remaining = count;
        state.error = Some(error);
    }

    /// Fail the next `count` operations with a transient storage error
    pub fn fail_transient(&self, count: u32) {
        self.fail_next(count, KairosError::storage("injected transient failure"));
    }

    /// Cancel any scheduled faults
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.remaining = 0;
        state.error = None;
    }

    /// Faults still scheduled
    pub fn remaining(&self) -> u32 {
        self.state.lock().remaining
    }

    /// Faults delivered so far
    pub fn injected(&self) -> u64 {
        self.state.lock().injected
    }

    /// Consume one scheduled fault, if any
    pub fn check(&self, operation: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.remaining == 0 {
            return Ok(());
        }
        state.remaining -= 1;
        state.injected += 1;
        let error = state
            .error
            .clone()
            .unwrap_or_else(|| KairosError::storage("injected failure"));
        tracing::debug!(operation, error = %error, "injecting fault");
        Err(error)
    }
}
