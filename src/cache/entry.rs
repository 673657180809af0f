//! Cache entries and the state snapshots they publish.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::error::QueryError;
use super::keys::QueryKey;

/// Monotonic generation stamp.
///
/// Every entry gets a fresh epoch when it is created and again whenever it is
/// invalidated; a fetch only counts as current while its epoch matches.
pub type Epoch = u64;

/// Type-erased cached value.
pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;

/// Type-erased fetcher kept by an entry so it can be run again on refetch.
pub(crate) type ErasedFetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<AnyData, QueryError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Per-query behavior. Unset fields fall back to the client's [`CacheConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub refetch_on_focus: Option<bool>,
    pub retry_count: Option<u32>,
    pub stale_time: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = Some(enabled);
        self
    }

    pub fn retry(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub(crate) fn resolve(&self, config: &CacheConfig) -> ResolvedOptions {
        ResolvedOptions {
            refetch_on_focus: self.refetch_on_focus.unwrap_or(config.refetch_on_focus),
            retry_count: self.retry_count.unwrap_or(config.retry_count),
            stale_time: self.stale_time.unwrap_or_else(|| config.stale_time()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedOptions {
    pub refetch_on_focus: bool,
    pub retry_count: u32,
    pub stale_time: Duration,
}

/// Untyped view of an entry, published on every change.
#[derive(Clone)]
pub struct Snapshot {
    pub status: QueryStatus,
    pub(crate) data: Option<AnyData>,
    pub error: Option<QueryError>,
    pub updated_at: Option<OffsetDateTime>,
    pub is_fetching: bool,
    pub is_invalidated: bool,
}

impl Snapshot {
    fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            is_fetching: false,
            is_invalidated: false,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("status", &self.status)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("updated_at", &self.updated_at)
            .field("is_fetching", &self.is_fetching)
            .field("is_invalidated", &self.is_invalidated)
            .finish()
    }
}

/// Typed query state handed to callers.
///
/// A failed refetch keeps the previous data next to the error, so stale data
/// is never shown without the error that replaced it.
#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub updated_at: Option<OffsetDateTime>,
    pub is_fetching: bool,
    pub is_invalidated: bool,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            updated_at: self.updated_at,
            is_fetching: self.is_fetching,
            is_invalidated: self.is_invalidated,
        }
    }
}

impl<T: Send + Sync + 'static> QueryState<T> {
    pub(crate) fn from_snapshot(key: &QueryKey, snapshot: &Snapshot) -> Self {
        let mut state = Self {
            status: snapshot.status,
            data: None,
            error: snapshot.error.clone(),
            updated_at: snapshot.updated_at,
            is_fetching: snapshot.is_fetching,
            is_invalidated: snapshot.is_invalidated,
        };
        if let Some(data) = &snapshot.data {
            match downcast::<T>(key, data.clone()) {
                Ok(data) => state.data = Some(data),
                Err(err) => {
                    state.status = QueryStatus::Error;
                    state.error = Some(err);
                }
            }
        }
        state
    }

    pub(crate) fn failed(error: QueryError) -> Self {
        Self {
            status: QueryStatus::Error,
            data: None,
            error: Some(error),
            updated_at: None,
            is_fetching: false,
            is_invalidated: false,
        }
    }
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading && self.data.is_none()
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// Data or the error that prevented it.
    pub fn into_result(self) -> Result<Arc<T>, QueryError> {
        match (self.error, self.data) {
            (Some(error), _) => Err(error),
            (None, Some(data)) => Ok(data),
            (None, None) => Err(QueryError::Aborted {
                key: String::from("<unknown>"),
                reason: "query has not produced data yet".to_string(),
            }),
        }
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(
    key: &QueryKey,
    data: AnyData,
) -> Result<Arc<T>, QueryError> {
    data.downcast::<T>().map_err(|_| QueryError::TypeMismatch {
        key: key.to_string(),
    })
}

/// Storage record for one key.
pub(crate) struct CacheEntry {
    pub status: QueryStatus,
    pub data: Option<AnyData>,
    pub error: Option<QueryError>,
    pub updated_at: Option<OffsetDateTime>,
    pub fetched_at: Option<Instant>,
    pub is_fetching: bool,
    pub invalidated: bool,
    pub epoch: Epoch,
    pub observers: usize,
    pub unobserved_since: Option<Instant>,
    pub options: ResolvedOptions,
    pub refetcher: Option<ErasedFetcher>,
    sender: watch::Sender<Snapshot>,
}

impl CacheEntry {
    pub fn new(epoch: Epoch, options: ResolvedOptions, now: Instant) -> Self {
        let (sender, _) = watch::channel(Snapshot::idle());
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            fetched_at: None,
            is_fetching: false,
            invalidated: false,
            epoch,
            observers: 0,
            unobserved_since: Some(now),
            options,
            refetcher: None,
            sender,
        }
    }

    /// Stale entries are refetched on the next read.
    pub fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated || self.status != QueryStatus::Success {
            return true;
        }
        match self.fetched_at {
            Some(fetched_at) => now.saturating_duration_since(fetched_at) >= self.options.stale_time,
            None => true,
        }
    }

    /// Fresh data, if the entry may be served without a fetch.
    pub fn fresh_data(&self, now: Instant) -> Option<AnyData> {
        if self.is_stale(now) {
            None
        } else {
            self.data.clone()
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            updated_at: self.updated_at,
            is_fetching: self.is_fetching,
            is_invalidated: self.invalidated,
        }
    }

    pub fn publish(&self) {
        self.sender.send_replace(self.snapshot());
    }
}

/// Marker tying a handle to the data type it downcasts to.
pub(crate) type TypeMarker<T> = PhantomData<fn() -> T>;

#[cfg(test)]
mod tests {
    use super::*;

    fn options(stale_ms: u64) -> ResolvedOptions {
        ResolvedOptions {
            refetch_on_focus: false,
            retry_count: 0,
            stale_time: Duration::from_millis(stale_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entry_goes_stale_after_window() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(1, options(1_000), now);
        assert!(entry.is_stale(now));

        entry.status = QueryStatus::Success;
        entry.data = Some(Arc::new(5u32));
        entry.fetched_at = Some(now);
        assert!(entry.fresh_data(now).is_some());

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(entry.is_stale(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_or_failed_entries_are_stale() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(1, options(60_000), now);
        entry.status = QueryStatus::Success;
        entry.data = Some(Arc::new(5u32));
        entry.fetched_at = Some(now);

        entry.invalidated = true;
        assert!(entry.is_stale(now));

        entry.invalidated = false;
        entry.status = QueryStatus::Error;
        assert!(entry.is_stale(now));
    }

    #[test]
    fn typed_state_reports_type_mismatch() {
        let key = QueryKey::resource("products");
        let snapshot = Snapshot {
            status: QueryStatus::Success,
            data: Some(Arc::new(String::from("not a number"))),
            error: None,
            updated_at: None,
            is_fetching: false,
            is_invalidated: false,
        };

        let state = QueryState::<u32>::from_snapshot(&key, &snapshot);
        assert!(state.is_error());
        assert!(matches!(state.error, Some(QueryError::TypeMismatch { .. })));
    }

    #[test]
    fn options_fall_back_to_config() {
        let config = CacheConfig {
            retry_count: 3,
            ..Default::default()
        };
        let resolved = QueryOptions::new().refetch_on_focus(true).resolve(&config);
        assert!(resolved.refetch_on_focus);
        assert_eq!(resolved.retry_count, 3);
        assert_eq!(resolved.stale_time, config.stale_time());
    }
}
