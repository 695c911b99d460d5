//! Cursor coverage: every cell below the watermark is visited exactly once

use kairos_core::{AccessContext, Cell, KeyRange, SweepBatch, Timestamp};
use kairos_sweep::{SweepConfig, SweepCursor, SweepPolicy};
use kairos_testkit::strategies::{arb_history, arb_size_bound, build_store, CellSpec};
use kairos_testkit::{cell, cell_range, init_test_tracing, uniform_history, MemoryCellStore};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn thorough(page_size: usize) -> SweepConfig {
    SweepConfig::default()
        .with_policy(SweepPolicy::Thorough)
        .with_page_size(page_size)
}

/// Run the cursor from the range start until a terminal batch
async fn drain(
    cursor: &SweepCursor<MemoryCellStore>,
    size_bound: u64,
    watermark: Timestamp,
) -> Vec<SweepBatch> {
    let ctx = AccessContext::unrestricted();
    let mut marker: Option<Cell> = None;
    let mut batches = Vec::new();
    loop {
        let batch = cursor
            .next_batch(marker.as_ref(), size_bound, watermark, &ctx)
            .await
            .unwrap();
        if batch.is_terminal() {
            assert_eq!(batch.last_cell_examined, marker);
            return batches;
        }
        marker = batch.last_cell_examined.clone();
        batches.push(batch);
    }
}

#[tokio::test]
async fn five_cells_in_batches_of_two() {
    init_test_tracing();
    // Versions sitting exactly on the watermark are not stale.
    let store = uniform_history(5, &[10, 50]);
    let cursor = SweepCursor::new(store, KeyRange::full(), &thorough(256)).unwrap();
    let ctx = AccessContext::unrestricted();
    let watermark = Timestamp(50);

    let first = cursor.next_batch(None, 2, watermark, &ctx).await.unwrap();
    let swept: Vec<Cell> = first.cells.iter().map(|c| c.cell.clone()).collect();
    assert_eq!(swept, vec![cell(1), cell(2)]);
    assert_eq!(first.last_cell_examined, Some(cell(2)));
    assert_eq!(first.num_cell_ts_pairs_examined, 2);
    assert!(first.cells.iter().all(|c| c.timestamps == vec![Timestamp(10)]));

    let second = cursor.next_batch(Some(&cell(2)), 2, watermark, &ctx).await.unwrap();
    let swept: Vec<Cell> = second.cells.iter().map(|c| c.cell.clone()).collect();
    assert_eq!(swept, vec![cell(3), cell(4)]);
    assert_eq!(second.last_cell_examined, Some(cell(4)));

    let third = cursor.next_batch(Some(&cell(4)), 2, watermark, &ctx).await.unwrap();
    let swept: Vec<Cell> = third.cells.iter().map(|c| c.cell.clone()).collect();
    assert_eq!(swept, vec![cell(5)]);
    assert_eq!(third.last_cell_examined, Some(cell(5)));
    assert_eq!(third.cells[0].timestamps, vec![Timestamp(10)]);

    let last = cursor.next_batch(Some(&cell(5)), 2, watermark, &ctx).await.unwrap();
    assert!(last.is_terminal());
    assert!(last.cells.is_empty());
    assert_eq!(last.last_cell_examined, Some(cell(5)));
}

#[tokio::test]
async fn versions_at_or_above_watermark_are_never_selected() {
    let store = MemoryCellStore::new();
    store.put(cell(1), 10);
    store.put(cell(1), 50);
    store.put(cell(1), 60);
    store.put(cell(2), 50);
    let cursor = SweepCursor::new(store, KeyRange::full(), &thorough(8)).unwrap();

    let batches = drain(&cursor, 100, Timestamp(50)).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].cells.len(), 1);
    assert_eq!(batches[0].cells[0].cell, cell(1));
    assert_eq!(batches[0].cells[0].timestamps, vec![Timestamp(10)]);
    assert_eq!(batches[0].num_cell_ts_pairs_examined, 1);
}

#[tokio::test]
async fn range_bounds_confine_the_scan() {
    let store = uniform_history(20, &[1, 2]);
    let cursor = SweepCursor::new(store, cell_range(5, 9), &thorough(3)).unwrap();

    let batches = drain(&cursor, 3, Timestamp(10)).await;
    let swept: Vec<Cell> = batches
        .iter()
        .flat_map(|b| b.cells.iter().map(|c| c.cell.clone()))
        .collect();
    assert_eq!(swept, vec![cell(5), cell(6), cell(7), cell(8)]);
    assert!(batches.iter().all(|b| b.num_cell_ts_pairs_examined == 4));
}

#[tokio::test]
async fn empty_range_is_terminal_immediately() {
    let store = uniform_history(3, &[1]);
    let cursor = SweepCursor::new(store, cell_range(10, 20), &thorough(4)).unwrap();
    assert!(drain(&cursor, 5, Timestamp(10)).await.is_empty());
}

fn run_pass(history: &[CellSpec], size_bound: u64, page_size: usize, watermark: u64) -> Vec<SweepBatch> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let cursor = SweepCursor::new(build_store(history), KeyRange::full(), &thorough(page_size)).unwrap();
    runtime.block_on(drain(&cursor, size_bound, Timestamp(watermark)))
}

proptest! {
    #[test]
    fn every_cell_below_watermark_swept_exactly_once(
        history in arb_history(24, 6),
        size_bound in arb_size_bound(),
        page_size in 1usize..6,
        watermark in 0u64..110,
    ) {
        let batches = run_pass(&history, size_bound, page_size, watermark);

        let expected: BTreeMap<Cell, Vec<Timestamp>> = history
            .iter()
            .filter_map(|(index, versions)| {
                let older: Vec<Timestamp> = versions
                    .iter()
                    .filter(|ts| **ts < watermark)
                    .map(|ts| Timestamp(*ts))
                    .collect();
                (!older.is_empty()).then(|| (cell(*index), older))
            })
            .collect();

        let mut seen: Vec<(Cell, Vec<Timestamp>)> = Vec::new();
        for (i, batch) in batches.iter().enumerate() {
            let last_batch = i + 1 == batches.len();
            prop_assert!(last_batch || batch.num_cell_ts_pairs_examined >= size_bound);
            if let Some(last) = batch.cells.last() {
                let without_last = batch.num_cell_ts_pairs_examined - last.timestamps.len() as u64;
                prop_assert!(without_last < size_bound);
                prop_assert_eq!(batch.last_cell_examined.as_ref(), Some(&last.cell));
            }
            seen.extend(batch.cells.iter().map(|c| (c.cell.clone(), c.timestamps.clone())));
        }

        prop_assert!(seen.windows(2).all(|pair| pair[0].0 < pair[1].0));
        let seen: BTreeMap<Cell, Vec<Timestamp>> = seen.into_iter().collect();
        prop_assert_eq!(seen, expected);
    }
}
