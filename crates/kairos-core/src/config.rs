//! Configuration loading and validation
//!
//! Component configs are plain serde structs with defaults. This module holds
//! the shared pieces: the validation trait, file loading for TOML and JSON,
//! an accumulating validator, and the millisecond duration codec used so
//! configs read naturally in TOML.

use crate::errors::{KairosError, Result};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;

/// Trait for configuration validation
pub trait ConfigValidation {
    /// Validate this configuration
    fn validate(&self) -> Result<()>;
}

/// Load a configuration file, choosing the format from its extension
pub fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        KairosError::not_found(format!("failed to read config {}: {e}", path.display()))
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content)
            .map_err(|e| KairosError::invalid(format!("invalid TOML in {}: {e}", path.display()))),
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| KairosError::invalid(format!("invalid JSON in {}: {e}", path.display()))),
        _ => Err(KairosError::invalid(format!(
            "unsupported config format: {}",
            path.display()
        ))),
    }
}

/// A single failed validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Value must be strictly positive
    Zero {
        /// Field name
        field: String,
    },
    /// Value is out of acceptable range
    OutOfRange {
        /// Field name
        field: String,
        /// Inclusive minimum
        min: u64,
        /// Inclusive maximum
        max: u64,
        /// Observed value
        actual: u64,
    },
    /// Custom validation failed
    Custom {
        /// Field name
        field: String,
        /// Rule that failed
        message: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Zero { field } => write!(f, "'{field}' must be greater than zero"),
            ValidationError::OutOfRange {
                field,
                min,
                max,
                actual,
            } => write!(f, "'{field}' must be between {min} and {max} (got {actual})"),
            ValidationError::Custom { field, message } => write!(f, "'{field}': {message}"),
        }
    }
}

/// Configuration validator that accumulates failed rules
#[derive(Debug, Default)]
pub struct ConfigValidator {
    errors: Vec<ValidationError>,
    field_prefix: String,
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator whose field names are prefixed with `section`
    pub fn section(section: &str) -> Self {
        Self {
            errors: Vec::new(),
            field_prefix: section.to_string(),
        }
    }

    fn qualify(&self, field: &str) -> String {
        if self.field_prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{field}", self.field_prefix)
        }
    }

    /// Require a strictly positive value
    pub fn positive(&mut self, field: &str, value: u64) -> &mut Self {
        if value == 0 {
            let field = self.qualify(field);
            self.errors.push(ValidationError::Zero { field });
        }
        self
    }

    /// Require `min <= value <= max`
    pub fn in_range(&mut self, field: &str, value: u64, min: u64, max: u64) -> &mut Self {
        if value < min || value > max {
            let field = self.qualify(field);
            self.errors.push(ValidationError::OutOfRange {
                field,
                min,
                max,
                actual: value,
            });
        }
        self
    }

    /// Require an arbitrary condition
    pub fn check(&mut self, field: &str, ok: bool, message: &str) -> &mut Self {
        if !ok {
            let field = self.qualify(field);
            self.errors.push(ValidationError::Custom {
                field,
                message: message.to_string(),
            });
        }
        self
    }

    /// Collapse the accumulated failures into a single error
    pub fn finish(&mut self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let joined = self
            .errors
            .drain(..)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(KairosError::invalid(joined))
    }
}

/// Serde codec storing a `Duration` as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
