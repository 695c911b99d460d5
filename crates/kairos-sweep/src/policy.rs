//! Which versions below the watermark a sweep removes

use kairos_core::{CellVersion, Timestamp};
use serde::{Deserialize, Serialize};

/// Staleness predicate applied to the versions of one cell
///
/// Both policies only ever see versions strictly below the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepPolicy {
    /// Keep the newest version below the watermark so reads at the watermark
    /// still resolve; remove everything older
    #[default]
    Conservative,
    /// Remove every version below the watermark
    Thorough,
}

impl SweepPolicy {
    /// Split `versions` (oldest first) into timestamps to remove and the one retained
    pub fn select(self, versions: &[CellVersion]) -> (Vec<Timestamp>, Option<Timestamp>) {
        match self {
            Self::Thorough => (versions.iter().map(|v| v.timestamp).collect(), None),
            Self::Conservative => match versions.split_last() {
                Some((newest, older)) => (
                    older.iter().map(|v| v.timestamp).collect(),
                    Some(newest.timestamp),
                ),
                None => (Vec::new(), None),
            },
        }
    }
}
