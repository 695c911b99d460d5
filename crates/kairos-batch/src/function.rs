//! The batched operation a coalescer sits in front of

use async_trait::async_trait;
use kairos_core::Result;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

/// An expensive keyed operation that can serve many distinct requests per call
///
/// A whole-call `Err` fails every caller folded into the batch. A per-key
/// `Err` in the returned map fails only callers of that key.
#[async_trait]
pub trait BatchFunction<R, V>: Send + Sync + 'static {
    /// Serve one batch of distinct requests
    async fn apply(&self, requests: Vec<R>) -> Result<HashMap<R, Result<V>>>;

    /// Reject a malformed request before it joins any batch
    fn validate(&self, _request: &R) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<R, V, T> BatchFunction<R, V> for Arc<T>
where
    R: Hash + Eq + Send + 'static,
    V: Send + 'static,
    T: BatchFunction<R, V> + ?Sized,
{
    async fn apply(&self, requests: Vec<R>) -> Result<HashMap<R, Result<V>>> {
        (**self).apply(requests).await
    }

    fn validate(&self, request: &R) -> Result<()> {
        (**self).validate(request)
    }
}

/// Closure adapter returned by [`batch_fn`]
pub struct FnBatch<F> {
    f: F,
}

/// Wrap an async closure as a [`BatchFunction`]
pub fn batch_fn<F>(f: F) -> FnBatch<F> {
    FnBatch { f }
}

#[async_trait]
impl<R, V, F, Fut> BatchFunction<R, V> for FnBatch<F>
where
    R: Hash + Eq + Send + 'static,
    V: Send + 'static,
    F: Fn(Vec<R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<R, Result<V>>>> + Send + 'static,
{
    async fn apply(&self, requests: Vec<R>) -> Result<HashMap<R, Result<V>>> {
        (self.f)(requests).await
    }
}

/// Build a per-request response map by applying `f` to each request
pub fn respond_each<R, V>(
    requests: Vec<R>,
    mut f: impl FnMut(&R) -> Result<V>,
) -> Result<HashMap<R, Result<V>>>
where
    R: Hash + Eq,
{
    Ok(requests
        .into_iter()
        .map(|request| {
            let value = f(&request);
            (request, value)
        })
        .collect())
}
