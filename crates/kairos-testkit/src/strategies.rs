//! Property test strategies for Kairos types
//!
//! Histories are generated as plain data so a property can build a fresh
//! [`MemoryCellStore`] per case.

use crate::fixtures::cell;
use crate::history::MemoryCellStore;
use proptest::prelude::*;

// Re-export proptest for convenience
pub use proptest;

/// One generated cell: its index and the timestamps of its versions
pub type CellSpec = (u32, Vec<u64>);

/// Strategy for a cell history of up to `max_cells` cells
///
/// Cell indices are unique; each cell gets between one and `max_versions`
/// versions with timestamps below 100.
pub fn arb_history(max_cells: usize, max_versions: usize) -> impl Strategy<Value = Vec<CellSpec>> {
    prop::collection::btree_map(
        0u32..1_000,
        prop::collection::btree_set(0u64..100, 1..=max_versions),
        0..=max_cells,
    )
    .prop_map(|cells| {
        cells
            .into_iter()
            .map(|(index, versions)| (index, versions.into_iter().collect()))
            .collect()
    })
}

/// Strategy for a sweep size bound
pub fn arb_size_bound() -> impl Strategy<Value = u64> {
    1u64..12
}

/// Materialize a generated history
pub fn build_store(history: &[CellSpec]) -> MemoryCellStore {
    let store = MemoryCellStore::new();
    for (index, versions) in history {
        for ts in versions {
            store.put(cell(*index), *ts);
        }
    }
    store
}
