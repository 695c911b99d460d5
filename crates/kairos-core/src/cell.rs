//! Cell addressing and sweep batch types
//!
//! A [`Cell`] is a `(row, column)` address in the store. Cells order by row then
//! column, which is the order every sweep scan walks them in.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a versioned value in the store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Row key
    pub row: Vec<u8>,
    /// Column key
    pub column: Vec<u8>,
}

impl Cell {
    /// Create a cell address
    pub fn new(row: impl Into<Vec<u8>>, column: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            String::from_utf8_lossy(&self.row),
            String::from_utf8_lossy(&self.column)
        )
    }
}

/// One timestamped version of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellVersion {
    /// Start timestamp of the transaction that wrote the version
    pub timestamp: Timestamp,
    /// Whether the version is a delete marker
    pub tombstone: bool,
}

impl CellVersion {
    /// A regular value version
    pub fn value(timestamp: impl Into<Timestamp>) -> Self {
        Self {
            timestamp: timestamp.into(),
            tombstone: false,
        }
    }

    /// A delete marker version
    pub fn tombstone(timestamp: impl Into<Timestamp>) -> Self {
        Self {
            timestamp: timestamp.into(),
            tombstone: true,
        }
    }
}

/// A cell plus the versions a scan returned for it, ascending by timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellHistoryEntry {
    /// Cell address
    pub cell: Cell,
    /// Versions of the cell, oldest first
    pub versions: Vec<CellVersion>,
}

/// A cell and the versions chosen for removal in one sweep pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellToSweep {
    /// Cell address
    pub cell: Cell,
    /// Versions to remove, oldest first
    pub timestamps: Vec<Timestamp>,
    /// Version left in place below the watermark, if any
    pub retained: Option<Timestamp>,
}

/// Result of one bounded sweep scan
///
/// `last_cell_examined` is the only field resumption depends on. The pair
/// counter is informative for throughput and backpressure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepBatch {
    /// Cells with versions to remove, in ascending key order
    pub cells: Vec<CellToSweep>,
    /// Number of cell-timestamp pairs examined while building the batch
    pub num_cell_ts_pairs_examined: u64,
    /// Number of distinct cells examined while building the batch
    pub cells_examined: u64,
    /// Marker the next batch resumes strictly after
    pub last_cell_examined: Option<Cell>,
}

impl SweepBatch {
    /// A batch that examined nothing, leaving the marker where it was
    pub fn terminal(marker: Option<Cell>) -> Self {
        Self {
            last_cell_examined: marker,
            ..Self::default()
        }
    }

    /// True when the scan found nothing after the resume marker
    pub fn is_terminal(&self) -> bool {
        self.cells_examined == 0
    }

    /// Number of versions this batch removes
    pub fn timestamps_to_sweep(&self) -> u64 {
        self.cells.iter().map(|c| c.timestamps.len() as u64).sum()
    }
}

/// Key range `[start, end)` over cells owned by one sweep job
///
/// `None` bounds are open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub start: Option<Cell>,
    /// Exclusive upper bound
    pub end: Option<Cell>,
}

impl KeyRange {
    /// The whole keyspace
    pub fn full() -> Self {
        Self::default()
    }

    /// Range from `start` (inclusive) to `end` (exclusive)
    pub fn new(start: Option<Cell>, end: Option<Cell>) -> Self {
        Self { start, end }
    }

    /// Whether `cell` falls inside the range
    pub fn contains(&self, cell: &Cell) -> bool {
        let above_start = self.start.as_ref().map_or(true, |s| cell >= s);
        let below_end = self.end.as_ref().map_or(true, |e| cell < e);
        above_start && below_end
    }

    /// Whether two ranges share any cell
    pub fn overlaps(&self, other: &Self) -> bool {
        let self_before_other = match (&self.end, &other.start) {
            (Some(end), Some(start)) => end <= start,
            _ => false,
        };
        let other_before_self = match (&other.end, &self.start) {
            (Some(end), Some(start)) => end <= start,
            _ => false,
        };
        !(self_before_other || other_before_self)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.start, &self.end) {
            (Some(s), Some(e)) => write!(f, "[{s}, {e})"),
            (Some(s), None) => write!(f, "[{s}, ..)"),
            (None, Some(e)) => write!(f, "[.., {e})"),
            (None, None) => write!(f, "[.., ..)"),
        }
    }
}
