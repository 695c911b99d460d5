//! Page-fetch contract for externally paginated result sets
//!
//! A [`PageSource`] is stateless: the position of the next page is derived
//! from the page before it. [`pages`] turns a source into a lazy, finite
//! stream that ends at the first empty page (or after the first page shorter
//! than the page size). The stream is not restartable; to resume, build a new
//! source positioned after the last item consumed.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use kairos_core::effects::CellHistory;
use kairos_core::{
    AccessContext, Cell, CellHistoryEntry, KairosError, KeyRange, Result, RetryPolicy, Timestamp,
};

/// A paginated data source
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Element of a page
    type Item: Clone + Send + Sync;

    /// The first page
    async fn first_page(&self) -> Result<Vec<Self::Item>>;

    /// The page following `current`; empty when the source is exhausted
    async fn next_page(&self, current: &[Self::Item]) -> Result<Vec<Self::Item>>;

    /// Maximum items per page
    fn page_size(&self) -> usize;
}

enum Position<T> {
    First,
    After(Vec<T>),
    Done,
}

/// Lazily walk every page of `source`
///
/// Yields non-empty pages in order. A fetch error is yielded once and ends
/// the stream.
pub fn pages<S: PageSource>(source: &S) -> impl Stream<Item = Result<Vec<S::Item>>> + Send + '_ {
    stream::unfold(Position::First, move |position| async move {
        let fetched = match position {
            Position::First => source.first_page().await,
            Position::After(previous) => source.next_page(&previous).await,
            Position::Done => return None,
        };
        match fetched {
            Ok(page) if page.is_empty() => None,
            Ok(page) => {
                let next = if page.len() < source.page_size() {
                    Position::Done
                } else {
                    Position::After(page.clone())
                };
                Some((Ok(page), next))
            }
            Err(err) => Some((Err(err), Position::Done)),
        }
    })
}

// =============================================================================
// Cell history pages
// =============================================================================

/// Pages of cell history below a watermark, strictly after a start marker
///
/// Every scan goes through the retry policy, so transient backend failures
/// are absorbed here and never reach the cursor.
pub struct CellPageSource<'a, H: ?Sized> {
    history: &'a H,
    range: &'a KeyRange,
    start_after: Option<&'a Cell>,
    below: Timestamp,
    page_size: usize,
    ctx: &'a AccessContext,
    retry: &'a RetryPolicy,
}

impl<'a, H: CellHistory + ?Sized> CellPageSource<'a, H> {
    /// Build a source over `range`; `page_size` must be positive
    pub fn new(
        history: &'a H,
        range: &'a KeyRange,
        start_after: Option<&'a Cell>,
        below: Timestamp,
        page_size: usize,
        ctx: &'a AccessContext,
        retry: &'a RetryPolicy,
    ) -> Result<Self> {
        if page_size == 0 {
            return Err(KairosError::invalid("page size must be positive"));
        }
        Ok(Self {
            history,
            range,
            start_after,
            below,
            page_size,
            ctx,
            retry,
        })
    }

    async fn scan_after(&self, after: Option<&Cell>) -> Result<Vec<CellHistoryEntry>> {
        self.retry
            .execute("history.scan", || {
                self.history
                    .scan(self.range, after, self.below, self.page_size, self.ctx)
            })
            .await
    }
}

#[async_trait]
impl<'a, H: CellHistory + ?Sized> PageSource for CellPageSource<'a, H> {
    type Item = CellHistoryEntry;

    async fn first_page(&self) -> Result<Vec<CellHistoryEntry>> {
        self.scan_after(self.start_after).await
    }

    async fn next_page(&self, current: &[CellHistoryEntry]) -> Result<Vec<CellHistoryEntry>> {
        match current.last() {
            Some(last) => self.scan_after(Some(&last.cell)).await,
            None => Ok(Vec::new()),
        }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

// =============================================================================
// In-memory listings
// =============================================================================

/// Pages over an ordered in-memory listing, such as the jobs of a node
#[derive(Debug, Clone)]
pub struct ListingPageSource<T> {
    items: Vec<T>,
    page_size: usize,
}

impl<T: Clone + PartialEq + Send + Sync> ListingPageSource<T> {
    /// Page through `items` in their given order
    pub fn new(items: Vec<T>, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(KairosError::invalid("page size must be positive"));
        }
        Ok(Self { items, page_size })
    }

    fn page_from(&self, start: usize) -> Vec<T> {
        self.items
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl<T: Clone + PartialEq + Send + Sync> PageSource for ListingPageSource<T> {
    type Item = T;

    async fn first_page(&self) -> Result<Vec<T>> {
        Ok(self.page_from(0))
    }

    async fn next_page(&self, current: &[T]) -> Result<Vec<T>> {
        let Some(last) = current.last() else {
            return Ok(Vec::new());
        };
        match self.items.iter().position(|item| item == last) {
            Some(index) => Ok(self.page_from(index + 1)),
            None => Err(KairosError::not_found("page position no longer in listing")),
        }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
