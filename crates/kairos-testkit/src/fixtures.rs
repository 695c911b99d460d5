//! Reusable test fixtures

use crate::history::MemoryCellStore;
use kairos_core::{AuthorityId, Cell, KeyRange};

/// Deterministic cell address; cells order by `index`
pub fn cell(index: u32) -> Cell {
    Cell::new(format!("row-{index:06}"), "c")
}

/// Deterministic authority identity
pub fn authority(index: u128) -> AuthorityId {
    AuthorityId::from_u128(index + 1)
}

/// Range covering `cell(start)` up to but excluding `cell(end)`
pub fn cell_range(start: u32, end: u32) -> KeyRange {
    KeyRange::new(Some(cell(start)), Some(cell(end)))
}

/// Store holding `cells` cells, each with one version per entry in `timestamps`
pub fn uniform_history(cells: u32, timestamps: &[u64]) -> MemoryCellStore {
    let store = MemoryCellStore::new();
    for index in 1..=cells {
        for ts in timestamps {
            store.put(cell(index), *ts);
        }
    }
    store
}
