//! Page-number pagination on top of the query cache.
//!
//! All loaded pages of one key live in a single entry as [`InfiniteData`].
//! The first page uses cursor 0; each next cursor is `last.page + 1`.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::debug;
use vitrine_api_types::PaginationResponse;

use super::client::{ClientInner, QueryClient};
use super::entry::{
    AnyData, ErasedFetcher, QueryOptions, QueryState, QueryStatus, ResolvedOptions, Snapshot,
    TypeMarker, downcast,
};
use super::error::QueryError;
use super::handle::ObserverGuard;
use super::keys::QueryKey;

/// A page that knows its own position.
pub trait Paginated {
    fn page(&self) -> u32;
    fn total_pages(&self) -> u32;
}

impl<T> Paginated for PaginationResponse<T> {
    fn page(&self) -> u32 {
        self.page
    }

    fn total_pages(&self) -> u32 {
        self.total_pages
    }
}

/// Loaded pages in fetch order, with the cursor each was fetched with.
#[derive(Debug)]
pub struct InfiniteData<P> {
    pub pages: Vec<Arc<P>>,
    pub page_params: Vec<u32>,
}

impl<P> Clone for InfiniteData<P> {
    fn clone(&self) -> Self {
        Self {
            pages: self.pages.clone(),
            page_params: self.page_params.clone(),
        }
    }
}

impl<P> Default for InfiniteData<P> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            page_params: Vec::new(),
        }
    }
}

impl<P: Paginated> InfiniteData<P> {
    pub fn last_page(&self) -> Option<&P> {
        self.pages.last().map(Arc::as_ref)
    }

    /// Cursor of the page after the last loaded one, if there is one.
    pub fn next_param(&self) -> Option<u32> {
        self.last_page().and_then(next_cursor)
    }

    pub fn has_next_page(&self) -> bool {
        self.next_param().is_some()
    }

    fn push(&mut self, param: u32, page: Arc<P>) {
        self.page_params.push(param);
        self.pages.push(page);
    }
}

impl<T> InfiniteData<PaginationResponse<T>> {
    /// Items of every loaded page, in order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.data.iter())
    }
}

/// Outcome of [`InfiniteQueryHandle::fetch_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchNext {
    /// A page was fetched and appended.
    Fetched,
    /// The last page was already loaded; nothing was requested.
    Exhausted,
    /// Another fetch for this key is running; the call did nothing.
    Ignored,
}

type PageFetcher<P> = Arc<dyn Fn(u32) -> BoxFuture<'static, Result<Arc<P>, QueryError>> + Send + Sync>;

impl QueryClient {
    /// Observe a paginated query. Loads the first page when nothing fresh is
    /// cached; [`InfiniteQueryHandle::fetch_next`] appends further pages.
    pub fn use_infinite_query<P, F, Fut, E>(
        &self,
        key: QueryKey,
        fetch_page: F,
        options: QueryOptions,
    ) -> Result<InfiniteQueryHandle<P>, QueryError>
    where
        P: Paginated + Send + Sync + 'static,
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, E>> + Send + 'static,
        E: Into<QueryError>,
    {
        let options = options.resolve(&self.inner.config);
        let page_fetcher: PageFetcher<P> = Arc::new(move |param| {
            let pending = fetch_page(param);
            async move {
                pending
                    .await
                    .map(Arc::new)
                    .map_err(Into::<QueryError>::into)
            }
            .boxed()
        });
        let refetcher = revalidator(
            Arc::downgrade(&self.inner),
            key.clone(),
            Arc::clone(&page_fetcher),
        );
        let (guard, receiver) = self.inner.observe(&key, refetcher, options)?;
        Ok(InfiniteQueryHandle {
            client: self.clone(),
            key,
            page_fetcher,
            options,
            receiver,
            _observer: guard,
            _marker: PhantomData,
        })
    }
}

/// Refetch every loaded page in order, starting again from cursor 0.
///
/// Holds the client weakly: the fetcher is stored inside the client's own
/// entries.
fn revalidator<P>(inner: Weak<ClientInner>, key: QueryKey, fetch_page: PageFetcher<P>) -> ErasedFetcher
where
    P: Paginated + Send + Sync + 'static,
{
    Arc::new(move || {
        let inner = inner.clone();
        let key = key.clone();
        let fetch_page = Arc::clone(&fetch_page);
        async move {
            let loaded = inner
                .upgrade()
                .and_then(|inner| inner.store.peek_data(&key))
                .and_then(|data| data.downcast::<InfiniteData<P>>().ok())
                .map_or(0, |data| data.pages.len());
            let target = loaded.max(1);

            let mut data = InfiniteData::default();
            let mut param = 0;
            while data.pages.len() < target {
                let page = fetch_page(param).await?;
                let next = next_cursor(page.as_ref());
                data.push(param, page);
                match next {
                    Some(next) => param = next,
                    None => break,
                }
            }
            debug!(key = %key, pages = data.pages.len(), "revalidated infinite query");
            Ok::<_, QueryError>(Arc::new(data) as AnyData)
        }
        .boxed()
    })
}

/// `None` once a page reports itself as the final one.
fn next_cursor<P: Paginated>(page: &P) -> Option<u32> {
    if page.page() >= page.total_pages() {
        None
    } else {
        Some(page.page() + 1)
    }
}

/// Live view of a paginated query.
pub struct InfiniteQueryHandle<P> {
    client: QueryClient,
    key: QueryKey,
    page_fetcher: PageFetcher<P>,
    options: ResolvedOptions,
    receiver: watch::Receiver<Snapshot>,
    _observer: ObserverGuard,
    _marker: TypeMarker<P>,
}

impl<P: Paginated + Send + Sync + 'static> InfiniteQueryHandle<P> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<InfiniteData<P>> {
        QueryState::from_snapshot(&self.key, &self.receiver.borrow())
    }

    pub fn has_next_page(&self) -> bool {
        self.state()
            .data
            .is_some_and(|data| data.has_next_page())
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.receiver.clone()
    }

    pub async fn changed(&mut self) -> Option<QueryState<InfiniteData<P>>> {
        self.receiver.changed().await.ok()?;
        Some(self.state())
    }

    /// Wait until no fetch is running and the first load has finished.
    pub async fn settled(&mut self) -> QueryState<InfiniteData<P>> {
        let key = self.key.clone();
        match self
            .receiver
            .wait_for(|snapshot| !snapshot.is_fetching && snapshot.status != QueryStatus::Idle)
            .await
        {
            Ok(snapshot) => QueryState::from_snapshot(&key, &snapshot),
            Err(_) => QueryState::failed(QueryError::Aborted {
                key: key.to_string(),
                reason: "entry was removed while waiting".to_string(),
            }),
        }
    }

    /// Fetch the page after the last loaded one and append it.
    ///
    /// Makes no request when the last page reports itself as the final one
    /// or when any fetch for this key is already running. Invalidated pages
    /// are refetched from cursor 0 before the next one is appended.
    pub async fn fetch_next(&self) -> Result<FetchNext, QueryError> {
        let inner = &self.client.inner;
        inner.ensure_active()?;

        let invalidated = inner
            .store
            .snapshot(&self.key)
            .is_some_and(|snapshot| snapshot.is_invalidated);
        if invalidated {
            if inner.inflight.contains(&self.key) {
                return Ok(FetchNext::Ignored);
            }
            let Some(fetch) = inner.start_refetch(&self.key) else {
                return Ok(FetchNext::Ignored);
            };
            debug!(key = %self.key, "revalidating invalidated pages before appending");
            fetch.await?;
        }

        let Some(current) = inner.store.peek_data(&self.key) else {
            if inner.inflight.contains(&self.key) {
                return Ok(FetchNext::Ignored);
            }
            return match inner.start_refetch(&self.key) {
                Some(fetch) => fetch.await.map(|_| FetchNext::Fetched),
                None => Ok(FetchNext::Ignored),
            };
        };
        let current = downcast::<InfiniteData<P>>(&self.key, current)?;
        let Some(next) = current.next_param() else {
            debug!(key = %self.key, "no further pages");
            return Ok(FetchNext::Exhausted);
        };
        let Some(epoch) = inner.store.epoch(&self.key) else {
            return Ok(FetchNext::Ignored);
        };

        let fetcher = append_page(current, next, Arc::clone(&self.page_fetcher));
        let started = inner.inflight.try_start(&self.key, epoch, || {
            inner.spawn_fetch(self.key.clone(), epoch, fetcher, self.options)
        });
        match started {
            Some(fetch) => {
                fetch.await?;
                Ok(FetchNext::Fetched)
            }
            None => {
                debug!(key = %self.key, "fetch already running, next page ignored");
                Ok(FetchNext::Ignored)
            }
        }
    }

    /// Refetch all loaded pages from the first one.
    pub async fn refetch(&self) -> QueryState<InfiniteData<P>> {
        match self.client.refetch::<InfiniteData<P>>(&self.key).await {
            Ok(_) => self.state(),
            Err(err) => {
                let mut state = self.state();
                state.status = QueryStatus::Error;
                state.error = Some(err);
                state
            }
        }
    }
}

fn append_page<P>(current: Arc<InfiniteData<P>>, param: u32, fetch_page: PageFetcher<P>) -> ErasedFetcher
where
    P: Paginated + Send + Sync + 'static,
{
    Arc::new(move || {
        let current = Arc::clone(&current);
        let fetch_page = Arc::clone(&fetch_page);
        async move {
            let page = fetch_page(param).await?;
            let mut data = InfiniteData::clone(&current);
            data.push(param, page);
            Ok::<_, QueryError>(Arc::new(data) as AnyData)
        }
        .boxed()
    })
}
