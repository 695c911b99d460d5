//! Node configuration for the `kairos` binary
//!
//! One TOML (or JSON) file composes the component configs. Selected fields
//! can be overridden from `KAIROS_*` environment variables; the result is
//! validated before any command uses it.

use kairos_batch::CoalescerConfig;
use kairos_core::config::{load_config_file, ConfigValidation};
use kairos_core::{KairosError, Result};
use kairos_sweep::{SweepConfig, SweepPolicy};
use kairos_timestamp::TimestampConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Complete configuration of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory for persisted sweep progress; in memory when unset
    pub cursor_dir: Option<PathBuf>,
    /// Timestamp authority and allocation coalescing
    pub timestamp: TimestampConfig,
    /// Sweep cursor and background service
    pub sweep: SweepConfig,
    /// Coalescing of sweep watermark lookups
    pub watermark: CoalescerConfig,
}

impl NodeConfig {
    /// Load `path` (or defaults when absent), apply environment overrides
    /// and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => load_config_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KAIROS_*` overrides looked up through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("KAIROS_CURSOR_DIR") {
            self.cursor_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("KAIROS_ALLOCATION_HEADROOM") {
            self.timestamp.allocation_headroom = parse("KAIROS_ALLOCATION_HEADROOM", &value)?;
        }
        if let Some(value) = lookup("KAIROS_COALESCER_WINDOW_MS") {
            let window = Duration::from_millis(parse("KAIROS_COALESCER_WINDOW_MS", &value)?);
            self.timestamp.coalescer.window = window;
            self.watermark.window = window;
        }
        if let Some(value) = lookup("KAIROS_SWEEP_BATCH_SIZE") {
            self.sweep.batch_size = parse("KAIROS_SWEEP_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("KAIROS_SWEEP_PAGE_SIZE") {
            self.sweep.page_size = parse("KAIROS_SWEEP_PAGE_SIZE", &value)?;
        }
        if let Some(value) = lookup("KAIROS_SWEEP_POLICY") {
            self.sweep.policy = match value.as_str() {
                "conservative" => SweepPolicy::Conservative,
                "thorough" => SweepPolicy::Thorough,
                other => {
                    return Err(KairosError::invalid(format!(
                        "KAIROS_SWEEP_POLICY must be conservative or thorough, got {other:?}"
                    )));
                }
            };
        }
        if let Some(value) = lookup("KAIROS_WATERMARK_LAG") {
            self.sweep.watermark_lag = parse("KAIROS_WATERMARK_LAG", &value)?;
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| KairosError::invalid(format!("{key}={value:?}: {e}")))
}

impl ConfigValidation for NodeConfig {
    fn validate(&self) -> Result<()> {
        self.timestamp.validate()?;
        self.sweep.validate()?;
        self.watermark.validate()
    }
}
