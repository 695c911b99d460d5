//! Effect traits for the collaborators the core consumes
//!
//! Each trait describes one external interface: the conditional-write bound
//! record, the ordered cell-history scan, and the watermark source. Production
//! backends and the in-memory handlers in `kairos-testkit` implement them.

pub mod bound;
pub mod history;
pub mod watermark;

pub use bound::{BoundBackend, CasOutcome};
pub use history::CellHistory;
pub use watermark::{FixedWatermark, WatermarkProvider};
