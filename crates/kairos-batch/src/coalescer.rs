//! Request coalescer
//!
//! Callers submit individual requests. Equal requests that are already in
//! flight are joined onto the running call; everything else is collected into
//! a forming batch that a driver task dispatches after the formation window.
//!
//! # Invariants
//!
//! - At most one backend call is outstanding per distinct request.
//! - Every caller of a request receives the result (or failure) of the one
//!   call that served it.
//! - Results are not retained once a batch completes; a later submission of
//!   the same request triggers a fresh call.
//! - A caller dropping its future detaches only that caller. The backend call
//!   keeps running for the remaining waiters.

use crate::config::CoalescerConfig;
use crate::function::{batch_fn, BatchFunction};
use indexmap::IndexMap;
use kairos_core::{KairosError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

type Waiter<V> = oneshot::Sender<Result<V>>;

/// Pending-request table shared by submitters and drivers
struct PendingTable<R, V> {
    /// Requests whose backend call is running
    in_flight: HashMap<R, Vec<Waiter<V>>>,
    /// Requests collected for the next dispatch, in arrival order
    forming: IndexMap<R, Vec<Waiter<V>>>,
    /// Whether a driver task owns the forming batch
    driver_scheduled: bool,
}

impl<R, V> Default for PendingTable<R, V> {
    fn default() -> Self {
        Self {
            in_flight: HashMap::new(),
            forming: IndexMap::new(),
            driver_scheduled: false,
        }
    }
}

/// Counters describing how much work was collapsed
#[derive(Debug, Default)]
pub struct CoalescerStats {
    submitted: AtomicU64,
    joined: AtomicU64,
    batches: AtomicU64,
    keys_applied: AtomicU64,
}

/// Point-in-time copy of [`CoalescerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoalescerStatsSnapshot {
    /// Requests submitted
    pub submitted: u64,
    /// Submissions that attached to an existing pending request
    pub joined: u64,
    /// Backend calls issued
    pub batches: u64,
    /// Distinct requests handed to the backend
    pub keys_applied: u64,
}

impl CoalescerStats {
    fn snapshot(&self) -> CoalescerStatsSnapshot {
        CoalescerStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            keys_applied: self.keys_applied.load(Ordering::Relaxed),
        }
    }
}

struct Inner<R, V> {
    function: Arc<dyn BatchFunction<R, V>>,
    config: CoalescerConfig,
    table: Mutex<PendingTable<R, V>>,
    stats: CoalescerStats,
}

/// Deduplicating, batching front end for a [`BatchFunction`]
///
/// Cloning is cheap and every clone shares one pending-request table.
/// Submissions must happen inside a Tokio runtime.
pub struct Coalescer<R, V> {
    inner: Arc<Inner<R, V>>,
}

impl<R, V> Clone for Coalescer<R, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, V> Coalescer<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Create a coalescer in front of `function`
    pub fn new(function: impl BatchFunction<R, V>, config: CoalescerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                function: Arc::new(function),
                config,
                table: Mutex::new(PendingTable::default()),
                stats: CoalescerStats::default(),
            }),
        }
    }

    /// Create a coalescer in front of an async closure
    pub fn from_fn<F, Fut>(f: F, config: CoalescerConfig) -> Self
    where
        F: Fn(Vec<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<R, Result<V>>>> + Send + 'static,
    {
        Self::new(batch_fn(f), config)
    }

    /// Submit one request and wait for the batch that serves it
    pub async fn submit(&self, request: R) -> Result<V> {
        self.inner.function.validate(&request)?;

        let (tx, rx) = oneshot::channel();
        self.enqueue(request, tx);

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(KairosError::cancelled("batch dropped before completing")),
        }
    }

    /// Submit many requests and wait for all of them
    pub async fn submit_all(&self, requests: impl IntoIterator<Item = R>) -> Vec<Result<V>> {
        futures::future::join_all(requests.into_iter().map(|r| self.submit(r))).await
    }

    fn enqueue(&self, request: R, tx: Waiter<V>) {
        let inner = &self.inner;
        inner.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let mut table = inner.table.lock();
        if let Some(waiters) = table.in_flight.get_mut(&request) {
            waiters.push(tx);
            inner.stats.joined.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if let Some(waiters) = table.forming.get_mut(&request) {
            waiters.push(tx);
            inner.stats.joined.fetch_add(1, Ordering::Relaxed);
            return;
        }

        table.forming.insert(request, vec![tx]);
        if !table.driver_scheduled {
            table.driver_scheduled = true;
            tokio::spawn(drive(Arc::clone(inner)));
        }
    }

    /// Number of distinct requests currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.table.lock().in_flight.len()
    }

    /// Number of distinct requests waiting for the next dispatch
    pub fn forming(&self) -> usize {
        self.inner.table.lock().forming.len()
    }

    /// Current counters
    pub fn stats(&self) -> CoalescerStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Formation policy in use
    pub fn config(&self) -> &CoalescerConfig {
        &self.inner.config
    }
}

/// Dispatch the forming batch once the window closes
async fn drive<R, V>(inner: Arc<Inner<R, V>>)
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    let mut scheduled = DriverGuard {
        inner: Arc::clone(&inner),
        armed: true,
    };
    if inner.config.window.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(inner.config.window).await;
    }

    let keys: Vec<R> = {
        let mut table = inner.table.lock();
        table.driver_scheduled = false;
        scheduled.armed = false;
        let forming = mem::take(&mut table.forming);
        let mut keys = Vec::with_capacity(forming.len());
        for (key, waiters) in forming {
            keys.push(key.clone());
            table.in_flight.insert(key, waiters);
        }
        keys
    };

    if keys.is_empty() {
        return;
    }

    let chunk_size = inner.config.max_batch_size.max(1);
    let calls = keys
        .chunks(chunk_size)
        .map(|chunk| run_batch(Arc::clone(&inner), chunk.to_vec()));
    futures::future::join_all(calls).await;
}

async fn run_batch<R, V>(inner: Arc<Inner<R, V>>, keys: Vec<R>)
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    inner.stats.batches.fetch_add(1, Ordering::Relaxed);
    inner
        .stats
        .keys_applied
        .fetch_add(keys.len() as u64, Ordering::Relaxed);
    tracing::debug!(batch_size = keys.len(), "dispatching coalesced batch");

    let mut guard = InFlightGuard {
        inner: Arc::clone(&inner),
        keys: Some(keys.clone()),
    };
    let outcome = inner.function.apply(keys).await;
    if let Err(err) = &outcome {
        tracing::warn!(error = %err, "coalesced batch failed");
    }
    guard.complete(outcome);
}

/// Hands the forming batch back if a driver dies during its window
///
/// Without it a driver dropped mid-sleep (its runtime shut down) would leave
/// `driver_scheduled` set and no later submission would spawn another.
struct DriverGuard<R, V>
where
    R: Hash + Eq,
{
    inner: Arc<Inner<R, V>>,
    armed: bool,
}

impl<R, V> Drop for DriverGuard<R, V>
where
    R: Hash + Eq,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut table = self.inner.table.lock();
        table.driver_scheduled = false;
        let forming = mem::take(&mut table.forming);
        drop(table);

        tracing::warn!(batch_size = forming.len(), "coalescer driver torn down before dispatch");
        for waiter in forming.into_values().flatten() {
            let _ = waiter.send(Err(KairosError::cancelled("coalescer driver aborted")));
        }
    }
}

/// Releases the in-flight keys of one batch exactly once
///
/// If the batch future is dropped or panics before completing, every waiter
/// is failed with `Cancelled` and the keys are removed, so later submissions
/// start a fresh call instead of joining a dead one.
struct InFlightGuard<R, V>
where
    R: Hash + Eq,
{
    inner: Arc<Inner<R, V>>,
    keys: Option<Vec<R>>,
}

impl<R, V> InFlightGuard<R, V>
where
    R: Hash + Eq,
    V: Clone,
{
    fn complete(&mut self, outcome: Result<HashMap<R, Result<V>>>) {
        let Some(keys) = self.keys.take() else {
            return;
        };

        let released = self.release(&keys);
        match outcome {
            Ok(mut results) => {
                for (key, waiters) in keys.iter().zip(released) {
                    let result = results.remove(key).unwrap_or_else(|| {
                        Err(KairosError::internal("batch function returned no result for request"))
                    });
                    deliver(waiters, &result);
                }
            }
            Err(err) => {
                let result = Err(err);
                for waiters in released {
                    deliver(waiters, &result);
                }
            }
        }
    }

    fn release(&self, keys: &[R]) -> Vec<Vec<Waiter<V>>> {
        let mut table = self.inner.table.lock();
        keys.iter()
            .map(|key| table.in_flight.remove(key).unwrap_or_default())
            .collect()
    }
}

impl<R, V> Drop for InFlightGuard<R, V>
where
    R: Hash + Eq,
{
    fn drop(&mut self) {
        let Some(keys) = self.keys.take() else {
            return;
        };
        tracing::warn!(batch_size = keys.len(), "coalesced batch torn down before completing");

        let mut table = self.inner.table.lock();
        for key in &keys {
            for waiter in table.in_flight.remove(key).unwrap_or_default() {
                let _ = waiter.send(Err(KairosError::cancelled("coalesced batch aborted")));
            }
        }
    }
}

fn deliver<V: Clone>(waiters: Vec<Waiter<V>>, result: &Result<V>) {
    for waiter in waiters {
        // A closed receiver means that caller cancelled its own wait.
        let _ = waiter.send(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::respond_each;
    use std::sync::atomic::AtomicUsize;

    fn echo_coalescer(calls: Arc<AtomicUsize>) -> Coalescer<u32, u32> {
        Coalescer::from_fn(
            move |keys: Vec<u32>| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    respond_each(keys, |k| Ok(k * 10))
                }
            },
            CoalescerConfig::immediate(),
        )
    }

    #[tokio::test]
    async fn test_single_submit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coalescer = echo_coalescer(Arc::clone(&calls));

        assert_eq!(coalescer.submit(4).await, Ok(40));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
        assert_eq!(coalescer.forming(), 0);
    }

    #[tokio::test]
    async fn test_no_caching_between_batches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coalescer = echo_coalescer(Arc::clone(&calls));

        coalescer.submit(1).await.unwrap();
        coalescer.submit(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_result_fails_only_that_key() {
        let coalescer: Coalescer<u32, u32> = Coalescer::from_fn(
            |keys: Vec<u32>| async move {
                let mut results = respond_each(keys, |k| Ok(*k));
                if let Ok(map) = results.as_mut() {
                    map.remove(&2);
                }
                results
            },
            CoalescerConfig::immediate(),
        );

        let results = coalescer.submit_all([1, 2, 3]).await;
        assert_eq!(results[0], Ok(1));
        assert!(matches!(results[1], Err(KairosError::Internal { .. })));
        assert_eq!(results[2], Ok(3));
    }

    #[test]
    fn test_driver_torn_down_mid_window_leaves_coalescer_usable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let coalescer: Coalescer<u32, u32> = Coalescer::from_fn(
            move |keys: Vec<u32>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    respond_each(keys, |k| Ok(k * 10))
                }
            },
            CoalescerConfig::default().with_window(std::time::Duration::from_secs(60)),
        );
        let runtime = || {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap()
        };

        let first = runtime();
        let abandoned = first.block_on(async {
            tokio::time::timeout(std::time::Duration::from_millis(10), coalescer.submit(1)).await
        });
        assert!(abandoned.is_err());
        assert_eq!(coalescer.forming(), 1);
        drop(first);

        assert_eq!(coalescer.forming(), 0);
        assert_eq!(runtime().block_on(coalescer.submit(1)), Ok(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_batch_size_splits_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let coalescer: Coalescer<u32, u32> = Coalescer::from_fn(
            move |keys: Vec<u32>| {
                let seen = Arc::clone(&seen);
                async move {
                    assert!(keys.len() <= 2);
                    seen.fetch_add(1, Ordering::SeqCst);
                    respond_each(keys, |k| Ok(*k))
                }
            },
            CoalescerConfig::immediate().with_max_batch_size(2),
        );

        let results = coalescer.submit_all([1, 2, 3, 4, 5]).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(coalescer.stats().batches, 3);
        assert_eq!(coalescer.stats().keys_applied, 5);
    }
}
