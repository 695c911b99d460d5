//! Unified error system for Kairos
//!
//! A single error type shared by the bound store, the coalescer and the sweep
//! machinery. The type is `Clone` so a single batch failure can be handed to
//! every caller that was folded into that batch.

use serde::{Deserialize, Serialize};

/// Unified error type for all Kairos operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum KairosError {
    /// Malformed request or configuration, rejected before any shared work
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// The restriction context rejected the access
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Error message describing the permission issue
        message: String,
    },

    /// Backing store failed or was unreachable
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Backend call did not complete in time
    #[error("Timeout: {message}")]
    Timeout {
        /// Error message describing the timed out operation
        message: String,
    },

    /// Another authority holds the bound; this instance must stop issuing timestamps
    #[error("Multiple active timestamp authorities: {holder} was fenced out by {current}")]
    Fenced {
        /// Authority (and token) that attempted the operation
        holder: String,
        /// Authority (and token) currently recorded in the backing store
        current: String,
    },

    /// The backing store reported a bound lower than one already observed
    #[error("Upper bound regressed from {previous} to {observed}")]
    BoundRegressed {
        /// Highest bound previously observed by this authority
        previous: u64,
        /// Bound read from the backing store
        observed: u64,
    },

    /// Operation on an authority handle that has been released or fenced
    #[error("Authority retired: {message}")]
    AuthorityRetired {
        /// Error message describing the retired authority
        message: String,
    },

    /// A sweep resume marker no longer resolves against the store
    #[error("Sweep cursor lost: {message}")]
    CursorLost {
        /// Error message describing why the cursor is unusable
        message: String,
    },

    /// The batch a caller was waiting on was torn down before completing
    #[error("Cancelled: {message}")]
    Cancelled {
        /// Error message describing the cancellation
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl KairosError {
    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a fencing violation error
    pub fn fenced(holder: impl Into<String>, current: impl Into<String>) -> Self {
        Self::Fenced {
            holder: holder.into(),
            current: current.into(),
        }
    }

    /// Create a retired authority error
    pub fn authority_retired(message: impl Into<String>) -> Self {
        Self::AuthorityRetired {
            message: message.into(),
        }
    }

    /// Create a lost cursor error
    pub fn cursor_lost(message: impl Into<String>) -> Self {
        Self::CursorLost {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Transient backend failures that may succeed when retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Timeout { .. })
    }

    /// Failures that end the authority role of this process
    ///
    /// These must reach an operator or supervisor; they are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Fenced { .. } | Self::BoundRegressed { .. } | Self::AuthorityRetired { .. }
        )
    }
}

/// Standard Result type for Kairos operations
pub type Result<T> = std::result::Result<T, KairosError>;

impl From<std::io::Error> for KairosError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(err.to_string()),
            std::io::ErrorKind::TimedOut => Self::timeout(err.to_string()),
            _ => Self::storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for KairosError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid(format!("JSON: {err}"))
    }
}
