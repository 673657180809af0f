//! The query client: cached reads, de-duplicated fetches and invalidation.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::sync::{broadcast, watch};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::config::CacheConfig;
use super::entry::{
    AnyData, Epoch, ErasedFetcher, QueryOptions, QueryState, QueryStatus, ResolvedOptions,
    Snapshot, downcast,
};
use super::error::QueryError;
use super::handle::{ObserverGuard, QueryHandle};
use super::inflight::{InflightRegistry, Join, SharedFetch};
use super::keys::QueryKey;
use super::notice::Notice;
use super::store::{Lookup, QueryStore};

/// Shared query cache.
///
/// Cheap to clone; every clone talks to the same store. Construct one per
/// application and hand it to whoever needs it.
#[derive(Clone)]
pub struct QueryClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub config: CacheConfig,
    pub store: QueryStore,
    pub inflight: InflightRegistry,
    disposed: AtomicBool,
    notices: broadcast::Sender<Notice>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::create(CacheConfig::default())
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.inner.store.len())
            .field("in_flight", &self.inner.inflight.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl QueryClient {
    pub fn create(config: CacheConfig) -> Self {
        let (notices, _) = broadcast::channel(config.notice_capacity_non_zero());
        Self {
            inner: Arc::new(ClientInner {
                store: QueryStore::new(&config),
                inflight: InflightRegistry::new(),
                disposed: AtomicBool::new(false),
                notices,
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Abort running fetches and drop every entry. Later calls fail with
    /// [`QueryError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.inflight.abort_all();
        self.inner.store.clear();
        info!(result = "disposed", "query client disposed");
    }

    /// Read `key`, fetching only when the cached entry is absent or stale.
    ///
    /// Errors are folded into the returned state; previously cached data is
    /// kept next to the error.
    #[instrument(name = "query", skip_all, fields(key = %key))]
    pub async fn query<T, F, Fut, E>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: QueryOptions,
    ) -> QueryState<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<QueryError>,
    {
        let options = options.resolve(&self.inner.config);
        let result = self.inner.fetch(&key, erase(fetcher), options).await;
        self.settle_state(&key, result)
    }

    /// Like [`QueryClient::query`] but returns the data or the error.
    pub async fn fetch_query<T, F, Fut, E>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: QueryOptions,
    ) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<QueryError>,
    {
        let options = options.resolve(&self.inner.config);
        let data = self.inner.fetch(&key, erase(fetcher), options).await?;
        downcast(&key, data)
    }

    /// Register an observer for `key` and start a background fetch when the
    /// entry is stale. The returned handle publishes every state change.
    pub fn use_query<T, F, Fut, E>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: QueryOptions,
    ) -> Result<QueryHandle<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<QueryError>,
    {
        let options = options.resolve(&self.inner.config);
        let (guard, receiver) = self.inner.observe(&key, erase(fetcher), options)?;
        Ok(QueryHandle::new(self.clone(), key, receiver, guard))
    }

    /// Re-run the fetcher stored for `key`, ignoring freshness.
    pub async fn refetch<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
    ) -> Result<Arc<T>, QueryError> {
        let data = self.inner.refetch(key).await?;
        downcast(key, data)
    }

    /// Cached data for `key`, regardless of freshness.
    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.inner
            .store
            .peek_data(key)
            .and_then(|data| downcast(key, data).ok())
    }

    /// Current state of `key` without triggering a fetch.
    pub fn query_state<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<QueryState<T>> {
        self.inner
            .store
            .snapshot(key)
            .map(|snapshot| QueryState::from_snapshot(key, &snapshot))
    }

    /// Mark every entry whose key starts with `prefix` stale. Running fetches
    /// for those keys are detached so later reads start fresh ones.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.inner.invalidate(prefix)
    }

    /// Refetch observed, stale entries that opted into `refetch_on_focus`.
    pub fn focus_regained(&self) -> usize {
        if self.is_disposed() {
            return 0;
        }
        let now = Instant::now();
        let mut started = 0;
        for key in self.inner.store.focus_candidates(now) {
            if self.inner.start_refetch(&key).is_some() {
                started += 1;
            }
        }
        debug!(started, "focus regained");
        started
    }

    /// Drop entries that had no observers for longer than `gc_time`. A sweep
    /// also runs on its own `gc_time` after an entry loses its last observer.
    pub fn collect_garbage(&self) -> usize {
        let removed = self
            .inner
            .store
            .collect_garbage(Instant::now(), self.inner.config.gc_time());
        if !removed.is_empty() {
            debug!(removed = removed.len(), "collected unobserved query entries");
        }
        removed.len()
    }

    /// Subscribe to mutation notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub(crate) fn notify(&self, notice: Notice) {
        // No receivers is fine.
        let _ = self.inner.notices.send(notice);
    }

    fn settle_state<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
        result: Result<AnyData, QueryError>,
    ) -> QueryState<T> {
        let mut state = self
            .query_state::<T>(key)
            .unwrap_or_else(|| QueryState::failed(QueryError::Disposed));
        match result.and_then(|data| downcast::<T>(key, data)) {
            Ok(data) => {
                state.status = QueryStatus::Success;
                state.data = Some(data);
                state.error = None;
            }
            Err(err) => {
                state.status = QueryStatus::Error;
                state.error = Some(err);
            }
        }
        state
    }
}

pub(crate) fn erase<T, F, Fut, E>(fetcher: F) -> ErasedFetcher
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<QueryError>,
{
    Arc::new(move || {
        let pending = fetcher();
        async move {
            pending
                .await
                .map(|data| Arc::new(data) as AnyData)
                .map_err(Into::<QueryError>::into)
        }
        .boxed()
    })
}

impl ClientInner {
    pub fn ensure_active(&self) -> Result<(), QueryError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(QueryError::Disposed)
        } else {
            Ok(())
        }
    }

    pub async fn fetch(
        self: &Arc<Self>,
        key: &QueryKey,
        fetcher: ErasedFetcher,
        options: ResolvedOptions,
    ) -> Result<AnyData, QueryError> {
        self.ensure_active()?;
        let lookup = self
            .store
            .prepare(key, options, Some(fetcher.clone()), Instant::now());
        match lookup {
            Lookup::Fresh(data) => {
                counter!("vitrine_query_hit_total").increment(1);
                debug!(key = %key, result = "hit", "query served from cache");
                Ok(data)
            }
            Lookup::Stale { epoch } => self.join(key, epoch, fetcher, options).await,
        }
    }

    async fn join(
        self: &Arc<Self>,
        key: &QueryKey,
        epoch: Epoch,
        fetcher: ErasedFetcher,
        options: ResolvedOptions,
    ) -> Result<AnyData, QueryError> {
        match self.join_or_start(key, epoch, fetcher, options, true) {
            Join::Ready(data) => {
                counter!("vitrine_query_hit_total").increment(1);
                Ok(data)
            }
            Join::Joined(fetch) => {
                counter!("vitrine_query_dedup_total").increment(1);
                debug!(key = %key, result = "joined", "joined in-flight fetch");
                fetch.await
            }
            Join::Started(fetch) => {
                counter!("vitrine_query_miss_total").increment(1);
                debug!(key = %key, result = "miss", "started fetch");
                fetch.await
            }
        }
    }

    fn join_or_start(
        self: &Arc<Self>,
        key: &QueryKey,
        epoch: Epoch,
        fetcher: ErasedFetcher,
        options: ResolvedOptions,
        recheck: bool,
    ) -> Join {
        self.inflight.join_or_start(
            key,
            epoch,
            || {
                if !recheck {
                    return None;
                }
                match self.store.lookup(key, Instant::now()) {
                    Some(Lookup::Fresh(data)) => Some(data),
                    _ => None,
                }
            },
            || self.spawn_fetch(key.clone(), epoch, fetcher, options),
        )
    }

    /// Register an observer and kick off a background fetch when needed.
    pub fn observe(
        self: &Arc<Self>,
        key: &QueryKey,
        fetcher: ErasedFetcher,
        options: ResolvedOptions,
    ) -> Result<(ObserverGuard, watch::Receiver<Snapshot>), QueryError> {
        self.ensure_active()?;
        let lookup = self
            .store
            .prepare(key, options, Some(fetcher.clone()), Instant::now());
        self.store.observe(key);
        let guard = ObserverGuard::new(Arc::clone(self), key.clone());
        let receiver = self
            .store
            .subscribe(key)
            .ok_or_else(|| QueryError::Aborted {
                key: key.to_string(),
                reason: "entry was evicted before it could be observed".to_string(),
            })?;

        if let Lookup::Stale { epoch } = lookup {
            // The spawned task owns the fetch; the shared future may be dropped.
            drop(self.join_or_start(key, epoch, fetcher, options, true));
        } else {
            counter!("vitrine_query_hit_total").increment(1);
        }
        Ok((guard, receiver))
    }

    /// Start (or join) a refetch with the stored fetcher, ignoring freshness.
    pub fn start_refetch(self: &Arc<Self>, key: &QueryKey) -> Option<SharedFetch> {
        let (fetcher, options) = self.store.refetcher(key)?;
        let epoch = self.store.epoch(key)?;
        match self.join_or_start(key, epoch, fetcher, options, false) {
            Join::Joined(fetch) | Join::Started(fetch) => Some(fetch),
            Join::Ready(_) => None,
        }
    }

    pub async fn refetch(self: &Arc<Self>, key: &QueryKey) -> Result<AnyData, QueryError> {
        self.ensure_active()?;
        match self.start_refetch(key) {
            Some(fetch) => fetch.await,
            None => Err(QueryError::InvalidKey(format!(
                "no fetcher registered for {key}"
            ))),
        }
    }

    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let keys = self.store.invalidate(prefix);
        let detached = self.inflight.detach(&keys);
        debug!(
            prefix = %prefix,
            invalidated = keys.len(),
            detached,
            "invalidated queries"
        );
        keys.len()
    }

    /// Sweep unobserved entries once `gc_time` has passed. Holds the client
    /// weakly so a pending sweep never keeps it alive.
    pub fn schedule_gc(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let inner = Arc::downgrade(self);
        let gc_time = self.config.gc_time();
        runtime.spawn(async move {
            tokio::time::sleep(gc_time).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.disposed.load(Ordering::Acquire) {
                return;
            }
            let removed = inner.store.collect_garbage(Instant::now(), gc_time);
            if !removed.is_empty() {
                debug!(removed = removed.len(), "collected unobserved query entries");
            }
        });
    }

    /// Spawn `fetcher` for `key` under `epoch`.
    ///
    /// The task outlives every reader: it records the result in the store and
    /// releases the in-flight slot even when nobody awaits it.
    pub fn spawn_fetch(
        self: &Arc<Self>,
        key: QueryKey,
        epoch: Epoch,
        fetcher: ErasedFetcher,
        options: ResolvedOptions,
    ) -> (SharedFetch, AbortHandle) {
        self.store.begin_fetch(&key, epoch);

        let inner = Arc::clone(self);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = AssertUnwindSafe(inner.run_with_retry(&task_key, &fetcher, options))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(QueryError::Aborted {
                        key: task_key.to_string(),
                        reason: "fetcher panicked".to_string(),
                    })
                });
            histogram!("vitrine_query_fetch_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
            inner
                .store
                .complete_fetch(&task_key, epoch, &result, Instant::now());
            inner.inflight.release(&task_key, epoch);
            if !inner.store.is_observed(&task_key) {
                inner.schedule_gc();
            }
            result
        });

        let abort = task.abort_handle();
        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(QueryError::Aborted {
                    key: key.to_string(),
                    reason: if err.is_cancelled() {
                        "query client disposed".to_string()
                    } else {
                        err.to_string()
                    },
                }),
            }
        }
        .boxed()
        .shared();
        (fetch, abort)
    }

    async fn run_with_retry(
        &self,
        key: &QueryKey,
        fetcher: &ErasedFetcher,
        options: ResolvedOptions,
    ) -> Result<AnyData, QueryError> {
        let mut attempt = 0;
        loop {
            match fetcher().await {
                Ok(data) => return Ok(data),
                Err(err) if attempt < options.retry_count && err.is_retryable() => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        key = %key,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "query fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(key = %key, attempt, error = %err, "query fetch failed");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::transport::TransportError;

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Fn() -> futures::future::BoxFuture<'static, Result<u32, QueryError>> + Send + Sync + 'static
    {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    fn products_key() -> QueryKey {
        QueryKey::resource("products").with(json!({
            "page": 0, "size": 10, "sortBy": "createdOn", "sortOrder": "desc"
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_queries_share_one_fetch() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = products_key();

        let (a, b) = tokio::join!(
            client.query(key.clone(), counting_fetcher(&calls, 1), QueryOptions::new()),
            client.query(key.clone(), counting_fetcher(&calls, 2), QueryOptions::new()),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.data.as_deref(), Some(&1));
        assert_eq!(b.data.as_deref(), Some(&1));
        assert!(client.inner.inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_identical_query_within_window_is_served_from_cache() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = client
            .query(products_key(), counting_fetcher(&calls, 1), QueryOptions::new())
            .await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = client
            .query(products_key(), counting_fetcher(&calls, 2), QueryOptions::new())
            .await;

        assert!(first.is_success());
        assert_eq!(second.data.as_deref(), Some(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        let third = client
            .query(products_key(), counting_fetcher(&calls, 3), QueryOptions::new())
            .await;
        assert_eq!(third.data.as_deref(), Some(&3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_stale_time_always_refetches() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions::new().stale_time(Duration::ZERO);

        client
            .query(products_key(), counting_fetcher(&calls, 1), options.clone())
            .await;
        client
            .query(products_key(), counting_fetcher(&calls, 1), options)
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_by_prefix_marks_only_matching_entries() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let admin = QueryKey::resource("admin-categories").with(json!({"page": 0}));
        let public = QueryKey::resource("categories");

        client
            .query(admin.clone(), counting_fetcher(&calls, 1), QueryOptions::new())
            .await;
        client
            .query(public.clone(), counting_fetcher(&calls, 1), QueryOptions::new())
            .await;

        assert_eq!(client.invalidate(&QueryKey::resource("admin-categories")), 1);
        assert!(client.query_state::<u32>(&admin).is_some_and(|s| s.is_invalidated));
        assert!(client.query_state::<u32>(&public).is_some_and(|s| !s.is_invalidated));

        client
            .query(admin, counting_fetcher(&calls, 2), QueryOptions::new())
            .await;
        client
            .query(public, counting_fetcher(&calls, 2), QueryOptions::new())
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn read_after_invalidation_never_joins_detached_fetch() {
        let client = QueryClient::default();
        let key = QueryKey::resource("categories").with(1);

        let slow = {
            let client = client.clone();
            let key = key.clone();
            tokio::spawn(async move {
                client
                    .query(
                        key,
                        || async {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, QueryError>("before")
                        },
                        QueryOptions::new(),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.invalidate(&QueryKey::resource("categories"));

        let after = client
            .query(
                key.clone(),
                || async { Ok::<_, QueryError>("after") },
                QueryOptions::new(),
            )
            .await;
        assert_eq!(after.data.as_deref(), Some(&"after"));

        let before = slow.await.expect("task");
        assert_eq!(before.data.as_deref(), Some(&"before"));
        // The late result is kept but never served as fresh.
        assert!(client.query_state::<&str>(&key).is_some_and(|s| s.is_invalidated));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_is_surfaced_with_previous_data() {
        let client = QueryClient::default();
        let key = QueryKey::resource("users").with(5);

        client
            .query(key.clone(), || async { Ok::<_, QueryError>(1u32) }, QueryOptions::new())
            .await;
        client.invalidate(&key);

        let state = client
            .query(
                key.clone(),
                || async { Err::<u32, _>(TransportError::status(500, None, "")) },
                QueryOptions::new(),
            )
            .await;

        assert!(state.is_error());
        assert_eq!(state.data.as_deref(), Some(&1));
        assert!(matches!(state.error, Some(QueryError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors_with_backoff() {
        let client = QueryClient::create(CacheConfig {
            retry_base_delay_ms: 100,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(TransportError::Network("connection reset".into()))
                } else {
                    Ok(42u32)
                }
            }
        };

        let started = Instant::now();
        let data = client
            .fetch_query(QueryKey::resource("products"), fetcher, QueryOptions::new().retry(3))
            .await
            .expect("third attempt succeeds");

        assert_eq!(*data, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_without_retry_count_or_for_client_errors() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let network = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(TransportError::Network("down".into())) }
        };
        let err = client
            .fetch_query(QueryKey::resource("a"), network, QueryOptions::new())
            .await
            .expect_err("fails");
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        let not_found = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(TransportError::status(404, None, "")) }
        };
        client
            .fetch_query(QueryKey::resource("b"), not_found, QueryOptions::new().retry(5))
            .await
            .expect_err("404 is terminal");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn type_mismatch_is_reported() {
        let client = QueryClient::default();
        let key = QueryKey::resource("products").with(1);
        client
            .query(key.clone(), || async { Ok::<_, QueryError>(1u32) }, QueryOptions::new())
            .await;

        let err = client
            .fetch_query(
                key,
                || async { Ok::<_, QueryError>(String::from("x")) },
                QueryOptions::new(),
            )
            .await
            .expect_err("cached u32 read as String");
        assert!(matches!(err, QueryError::TypeMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_rejects_further_queries() {
        let client = QueryClient::default();
        let key = QueryKey::resource("products");
        client
            .query(key.clone(), || async { Ok::<_, QueryError>(1u32) }, QueryOptions::new())
            .await;

        client.dispose();
        assert!(client.is_empty());

        let state = client
            .query(key, || async { Ok::<_, QueryError>(1u32) }, QueryOptions::new())
            .await;
        assert!(matches!(state.error, Some(QueryError::Disposed)));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_aborts_running_fetches() {
        let client = QueryClient::default();
        let pending = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .fetch_query(
                        QueryKey::resource("slow"),
                        || async {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            Ok::<_, QueryError>(1u32)
                        },
                        QueryOptions::new(),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        client.dispose();
        let err = pending.await.expect("task").expect_err("aborted");
        assert!(matches!(err, QueryError::Aborted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_fetcher_releases_the_slot() {
        let client = QueryClient::default();
        let key = QueryKey::resource("boom");

        let err = client
            .fetch_query(
                key.clone(),
                || async {
                    if true {
                        panic!("fetcher blew up");
                    }
                    Ok::<u32, QueryError>(0)
                },
                QueryOptions::new(),
            )
            .await
            .expect_err("panic becomes an error");
        assert!(matches!(err, QueryError::Aborted { .. }));
        assert!(client.inner.inflight.is_empty());

        let data = client
            .fetch_query(key, || async { Ok::<_, QueryError>(7u32) }, QueryOptions::new())
            .await
            .expect("next read starts fresh");
        assert_eq!(*data, 7);
    }
}
