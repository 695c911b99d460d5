//! Opaque authorization context threaded through sweep and maintenance calls
//!
//! The core never inspects the capability it carries; backends that enforce
//! access control downcast it to their own type.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Capability object passed through to backends untouched
#[derive(Clone, Default)]
pub struct AccessContext {
    capability: Option<Arc<dyn Any + Send + Sync>>,
    label: Option<Arc<str>>,
}

impl AccessContext {
    /// A context carrying no restriction
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Wrap a backend-specific capability
    pub fn new<C: Any + Send + Sync>(capability: C) -> Self {
        Self {
            capability: Some(Arc::new(capability)),
            label: None,
        }
    }

    /// Attach a label used only in log output
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Borrow the capability as a concrete type
    pub fn capability<C: Any + Send + Sync>(&self) -> Option<&C> {
        self.capability.as_ref()?.downcast_ref::<C>()
    }

    /// Log label, if one was attached
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// True when no capability was attached
    pub fn is_unrestricted(&self) -> bool {
        self.capability.is_none()
    }
}

impl fmt::Debug for AccessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessContext")
            .field("label", &self.label)
            .field("restricted", &self.capability.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct ReadOnly(&'static str);

    #[test]
    fn test_capability_roundtrip() {
        let ctx = AccessContext::new(ReadOnly("sweeper")).with_label("sweep-job");
        assert_eq!(ctx.capability::<ReadOnly>(), Some(&ReadOnly("sweeper")));
        assert!(ctx.capability::<u32>().is_none());
        assert!(!ctx.is_unrestricted());
        assert!(AccessContext::unrestricted().is_unrestricted());
    }
}
