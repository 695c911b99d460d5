//! Timestamp, bound and authority identity types

use crate::errors::{KairosError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A logical timestamp handed out to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from its raw value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Timestamp `lag` ticks earlier, clamped at zero
    pub fn saturating_sub(self, lag: u64) -> Self {
        Self(self.0.saturating_sub(lag))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Exclusive upper limit of timestamps already allocated by the authority
///
/// Once persisted a bound never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Bound(pub u64);

impl Bound {
    /// Create a bound from its raw value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The first timestamp not yet covered by this bound
    pub const fn first_unallocated(self) -> Timestamp {
        Timestamp(self.0)
    }

    /// Advance the bound by `delta`, rejecting overflow
    pub fn checked_add(self, delta: u64) -> Result<Self> {
        self.0
            .checked_add(delta)
            .map(Self)
            .ok_or_else(|| KairosError::invalid(format!("bound {} + {delta} overflows", self.0)))
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Bound {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl TryFrom<i64> for Bound {
    type Error = KairosError;

    fn try_from(value: i64) -> Result<Self> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| KairosError::invalid(format!("negative bound {value}")))
    }
}

/// Half-open range `[start, end)` of timestamps issued to one caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampRange {
    /// First timestamp in the range
    pub start: Timestamp,
    /// First timestamp after the range
    pub end: Timestamp,
}

impl TimestampRange {
    /// Create a range; `end` must not precede `start`
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if end < start {
            return Err(KairosError::invalid(format!(
                "timestamp range end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of timestamps in the range
    pub fn len(&self) -> u64 {
        self.end.0 - self.start.0
    }

    /// True if the range holds no timestamps
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `ts` falls within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Whether two ranges share any timestamp
    ///
    /// An empty range shares nothing, even when it sits inside the other.
    pub fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// Iterate every timestamp in the range
    pub fn iter(&self) -> impl Iterator<Item = Timestamp> {
        (self.start.0..self.end.0).map(Timestamp)
    }
}

impl fmt::Display for TimestampRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Identity of one timestamp authority instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuthorityId(pub Uuid);

impl AuthorityId {
    /// Create a random authority identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic identity, mostly useful in tests
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for AuthorityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuthorityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        write!(f, "authority-{}", hex::encode(&bytes[..4]))
    }
}

/// Monotonic token identifying which authority last took over the bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FencingToken(pub u64);

impl FencingToken {
    /// Token issued to the next authority that takes over
    pub fn next(self) -> Result<Self> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or_else(|| KairosError::internal("fencing token space exhausted"))
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The record persisted in the backing store for the bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredBound {
    /// Current upper limit
    pub bound: Bound,
    /// Fencing token of the authority that wrote the record
    pub token: FencingToken,
    /// Authority that wrote the record
    pub authority: AuthorityId,
}

impl StoredBound {
    /// Human-readable owner label used in fencing errors
    pub fn owner(&self) -> String {
        format!("{}{}", self.authority, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_negative_bound_rejected() {
        assert!(Bound::try_from(-1i64).is_err());
        assert_eq!(Bound::try_from(42i64).unwrap(), Bound(42));
    }

    #[test]
    fn test_bound_overflow_rejected() {
        assert!(Bound(u64::MAX).checked_add(1).is_err());
        assert_eq!(Bound(100).checked_add(10).unwrap(), Bound(110));
    }

    #[test]
    fn test_range_overlap() {
        let a = TimestampRange::new(Timestamp(100), Timestamp(110)).unwrap();
        let b = TimestampRange::new(Timestamp(110), Timestamp(120)).unwrap();
        let c = TimestampRange::new(Timestamp(105), Timestamp(115)).unwrap();

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert_eq!(a.len(), 10);
        assert!(a.contains(Timestamp(109)));
        assert!(!a.contains(Timestamp(110)));
        assert!(TimestampRange::new(Timestamp(5), Timestamp(4)).is_err());
    }

    fn arb_range() -> impl Strategy<Value = TimestampRange> {
        (0u64..64, 0u64..16).prop_map(|(start, len)| TimestampRange {
            start: Timestamp(start),
            end: Timestamp(start + len),
        })
    }

    proptest! {
        #[test]
        fn overlap_matches_shared_timestamps(a in arb_range(), b in arb_range()) {
            let shared = a.iter().any(|ts| b.contains(ts));
            prop_assert_eq!(a.overlaps(&b), shared);
            prop_assert_eq!(b.overlaps(&a), shared);
        }

        #[test]
        fn range_length_matches_iteration(r in arb_range()) {
            prop_assert_eq!(r.iter().count() as u64, r.len());
            prop_assert_eq!(r.is_empty(), r.len() == 0);
        }
    }
}
