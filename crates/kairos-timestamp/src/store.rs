//! Fenced monotonic bound store
//!
//! One [`FencedBoundStore`] represents one authority instance's claim on the
//! persisted bound. Acquiring the store bumps the fencing token on the stored
//! record; every later write is a compare-and-swap against the record this
//! instance last wrote, so a write from an authority that has been taken over
//! observes the newer token and fails instead of overwriting.
//!
//! # Lifecycle
//!
//! ```text
//! acquire ──> Active ──(newer token observed)──> Fenced
//!                 └──────────(release)─────────> Retired
//! ```
//!
//! Once not `Active`, every operation fails immediately without touching the
//! backend. Fencing is never retried.

use kairos_core::effects::{BoundBackend, CasOutcome};
use kairos_core::{
    AuthorityId, Bound, FencingToken, KairosError, Result, RetryPolicy, StoredBound,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Acquisition attempts lost to concurrent acquirers before giving up
const MAX_ACQUIRE_RACES: u32 = 8;

/// Conflicts against our own earlier writes tolerated per store call
const MAX_SELF_CONFLICTS: u32 = 3;

/// Role of this instance with respect to the persisted bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityState {
    /// This instance holds the current fencing token
    Active,
    /// A newer authority took over, or the backend violated monotonicity
    Fenced {
        /// Error every subsequent operation fails with
        cause: KairosError,
    },
    /// Released voluntarily
    Retired,
}

/// Single authoritative store of the upper timestamp bound
pub struct FencedBoundStore<B> {
    backend: B,
    authority: AuthorityId,
    token: FencingToken,
    /// Record this instance last wrote; writes are serialized on it
    record: Mutex<StoredBound>,
    /// Highest bound ever returned or written by this instance
    high_water: AtomicU64,
    state: RwLock<AuthorityState>,
    retry: RetryPolicy,
}

impl<B: BoundBackend> FencedBoundStore<B> {
    /// Fence in `authority` as the single writer of the bound
    ///
    /// Bumps the fencing token on the stored record, creating the record at
    /// bound zero if the store is empty. Races with concurrent acquirers are
    /// retried; transient backend errors go through `retry`.
    pub async fn acquire(backend: B, authority: AuthorityId, retry: RetryPolicy) -> Result<Self> {
        for race in 0..MAX_ACQUIRE_RACES {
            let current = retry.execute("bound.read", || backend.read()).await?;
            let claimed = match current {
                Some(record) => StoredBound {
                    bound: record.bound,
                    token: record.token.next()?,
                    authority,
                },
                None => StoredBound {
                    bound: Bound(0),
                    token: FencingToken(1),
                    authority,
                },
            };

            let outcome = retry
                .execute("bound.acquire", || {
                    backend.compare_and_swap(current, claimed)
                })
                .await?;
            match outcome {
                CasOutcome::Committed => {}
                // A retried swap whose first attempt landed
                CasOutcome::Conflict { actual } if actual == Some(claimed) => {}
                CasOutcome::Conflict { actual } => {
                    tracing::debug!(
                        %authority,
                        race,
                        holder = %actual.map(|r| r.owner()).unwrap_or_default(),
                        "bound acquisition raced another authority"
                    );
                    continue;
                }
            }

            tracing::info!(
                %authority,
                token = %claimed.token,
                bound = claimed.bound.value(),
                previous = %current.map(|r| r.owner()).unwrap_or_default(),
                "timestamp authority acquired bound"
            );
            return Ok(Self {
                backend,
                authority,
                token: claimed.token,
                record: Mutex::new(claimed),
                high_water: AtomicU64::new(claimed.bound.value()),
                state: RwLock::new(AuthorityState::Active),
                retry,
            });
        }

        Err(KairosError::timeout(format!(
            "{authority} lost {MAX_ACQUIRE_RACES} acquisition races"
        )))
    }

    /// Last known upper bound, read from the backend
    ///
    /// Never returns a value below one this instance has already returned or
    /// written. A record carrying another token fences this instance.
    ///
    /// A read that overlaps one of our own writes may see the older record;
    /// only a record below what was committed before the read started counts
    /// as a regression.
    pub async fn upper_limit(&self) -> Result<Bound> {
        self.ensure_active()?;
        let floor = self.high_water.load(Ordering::SeqCst);
        let stored = self
            .retry
            .execute("bound.read", || self.backend.read())
            .await?;

        let stored = match stored {
            Some(stored) if self.owns(&stored) => stored,
            other => return Err(self.fence_out(other)),
        };
        self.observe(floor, stored.bound)
    }

    /// Persist `new` as the upper limit
    ///
    /// `new` below the last written bound is rejected as invalid without
    /// touching the backend. If another authority has taken over, this
    /// instance is fenced and the call fails with `Fenced`.
    pub async fn store_upper_limit(&self, new: Bound) -> Result<()> {
        self.ensure_active()?;
        let mut record = self.record.lock().await;
        // Another writer may have fenced us while we waited on the lock.
        self.ensure_active()?;

        if new < record.bound {
            return Err(KairosError::invalid(format!(
                "upper limit {new} is below the stored limit {}",
                record.bound
            )));
        }

        let desired = StoredBound {
            bound: new,
            ..*record
        };
        let mut expected = *record;

        for _ in 0..MAX_SELF_CONFLICTS {
            let outcome = self
                .retry
                .execute("bound.store", || {
                    self.backend.compare_and_swap(Some(expected), desired)
                })
                .await?;

            match outcome {
                CasOutcome::Committed => {
                    *record = desired;
                    self.high_water.fetch_max(new.value(), Ordering::SeqCst);
                    tracing::debug!(authority = %self.authority, bound = new.value(), "stored upper limit");
                    return Ok(());
                }
                // Our own write from an earlier attempt is what the store holds.
                CasOutcome::Conflict { actual: Some(actual) } if self.owns(&actual) => {
                    if actual.bound >= new {
                        *record = actual;
                        self.high_water
                            .fetch_max(actual.bound.value(), Ordering::SeqCst);
                        return Ok(());
                    }
                    expected = actual;
                }
                CasOutcome::Conflict { actual } => return Err(self.fence_out(actual)),
            }
        }

        Err(KairosError::internal(format!(
            "{} could not reconcile its own bound record",
            self.authority
        )))
    }

    /// Give up the authority role; later operations fail with `AuthorityRetired`
    pub fn release(&self) {
        let mut state = self.state.write();
        if *state == AuthorityState::Active {
            *state = AuthorityState::Retired;
            tracing::info!(authority = %self.authority, token = %self.token, "timestamp authority released");
        }
    }

    /// Fail unless this instance still holds the bound
    pub fn ensure_active(&self) -> Result<()> {
        match &*self.state.read() {
            AuthorityState::Active => Ok(()),
            AuthorityState::Fenced { cause } => Err(cause.clone()),
            AuthorityState::Retired => Err(KairosError::authority_retired(format!(
                "{}{} was released",
                self.authority, self.token
            ))),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> AuthorityState {
        self.state.read().clone()
    }

    /// True while this instance holds the bound
    pub fn is_active(&self) -> bool {
        matches!(*self.state.read(), AuthorityState::Active)
    }

    /// Identity of this authority instance
    pub fn authority(&self) -> AuthorityId {
        self.authority
    }

    /// Fencing token issued at acquisition
    pub fn token(&self) -> FencingToken {
        self.token
    }

    /// Highest bound this instance has returned or written
    pub fn high_water(&self) -> Bound {
        Bound(self.high_water.load(Ordering::SeqCst))
    }

    fn owns(&self, record: &StoredBound) -> bool {
        record.token == self.token && record.authority == self.authority
    }

    /// Check a read against `floor`, the high water mark when it started
    fn observe(&self, floor: u64, bound: Bound) -> Result<Bound> {
        if bound.value() < floor {
            let cause = KairosError::BoundRegressed {
                previous: floor,
                observed: bound.value(),
            };
            tracing::error!(
                authority = %self.authority,
                previous = floor,
                observed = bound.value(),
                "persisted upper bound went backwards; stopping authority"
            );
            self.poison(cause.clone());
            return Err(cause);
        }
        let previous = self.high_water.fetch_max(bound.value(), Ordering::SeqCst);
        Ok(Bound(previous.max(bound.value())))
    }

    fn fence_out(&self, current: Option<StoredBound>) -> KairosError {
        let holder = format!("{}{}", self.authority, self.token);
        let current = current.map_or_else(|| "<no record>".to_string(), |r| r.owner());
        tracing::error!(
            %holder,
            %current,
            "multiple active timestamp authorities detected; this instance is fenced out"
        );
        let cause = KairosError::fenced(holder, current);
        self.poison(cause.clone());
        cause
    }

    fn poison(&self, cause: KairosError) {
        let mut state = self.state.write();
        if *state == AuthorityState::Active {
            *state = AuthorityState::Fenced { cause };
        }
    }
}
