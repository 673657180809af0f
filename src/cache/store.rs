//! Query entry storage.
//!
//! Entries live in a single LRU map guarded by a std `RwLock`. No lock in
//! this module is held across an `.await`.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::entry::{AnyData, CacheEntry, Epoch, ErasedFetcher, QueryStatus, ResolvedOptions, Snapshot};
use super::error::QueryError;
use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};
use super::registry::ResourceIndex;

const SOURCE: &str = "cache::store";

/// Result of looking an entry up before a read.
pub(crate) enum Lookup {
    /// Data may be served as is.
    Fresh(AnyData),
    /// A fetch is needed; it must run under this epoch.
    Stale { epoch: Epoch },
}

pub(crate) struct QueryStore {
    entries: RwLock<LruCache<QueryKey, CacheEntry>>,
    index: ResourceIndex,
    epochs: AtomicU64,
}

impl QueryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            index: ResourceIndex::new(),
            epochs: AtomicU64::new(1),
        }
    }

    fn next_epoch(&self) -> Epoch {
        self.epochs.fetch_add(1, Ordering::Relaxed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Create the entry when absent, remember how to refetch it, and report
    /// whether it can be served without a fetch.
    pub fn prepare(
        &self,
        key: &QueryKey,
        options: ResolvedOptions,
        refetcher: Option<ErasedFetcher>,
        now: Instant,
    ) -> Lookup {
        let mut entries = rw_write(&self.entries, SOURCE, "prepare");
        if !entries.contains(key) {
            let entry = CacheEntry::new(self.next_epoch(), options, now);
            if let Some((evicted, _)) = entries.push(key.clone(), entry) {
                self.index.unregister(&evicted);
                counter!("vitrine_query_evict_total").increment(1);
                debug!(key = %evicted, result = "evicted", "query entry evicted");
            }
            self.index.register(key);
        }

        let Some(entry) = entries.get_mut(key) else {
            return Lookup::Stale {
                epoch: self.next_epoch(),
            };
        };
        entry.options = options;
        if let Some(refetcher) = refetcher {
            entry.refetcher = Some(refetcher);
        }
        match entry.fresh_data(now) {
            Some(data) => Lookup::Fresh(data),
            None => Lookup::Stale { epoch: entry.epoch },
        }
    }

    /// Freshness check for an existing entry; `None` when the key is unknown.
    pub fn lookup(&self, key: &QueryKey, now: Instant) -> Option<Lookup> {
        let mut entries = rw_write(&self.entries, SOURCE, "lookup");
        entries.get(key).map(|entry| match entry.fresh_data(now) {
            Some(data) => Lookup::Fresh(data),
            None => Lookup::Stale { epoch: entry.epoch },
        })
    }

    pub fn epoch(&self, key: &QueryKey) -> Option<Epoch> {
        rw_read(&self.entries, SOURCE, "epoch")
            .peek(key)
            .map(|entry| entry.epoch)
    }

    pub fn peek_data(&self, key: &QueryKey) -> Option<AnyData> {
        rw_read(&self.entries, SOURCE, "peek_data")
            .peek(key)
            .and_then(|entry| entry.data.clone())
    }

    pub fn snapshot(&self, key: &QueryKey) -> Option<Snapshot> {
        rw_read(&self.entries, SOURCE, "snapshot")
            .peek(key)
            .map(CacheEntry::snapshot)
    }

    pub fn subscribe(&self, key: &QueryKey) -> Option<watch::Receiver<Snapshot>> {
        rw_read(&self.entries, SOURCE, "subscribe")
            .peek(key)
            .map(CacheEntry::subscribe)
    }

    pub fn refetcher(&self, key: &QueryKey) -> Option<(ErasedFetcher, ResolvedOptions)> {
        rw_read(&self.entries, SOURCE, "refetcher")
            .peek(key)
            .and_then(|entry| {
                entry
                    .refetcher
                    .clone()
                    .map(|refetcher| (refetcher, entry.options))
            })
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Fetch lifecycle
    // ========================================================================

    pub fn begin_fetch(&self, key: &QueryKey, epoch: Epoch) {
        let mut entries = rw_write(&self.entries, SOURCE, "begin_fetch");
        if let Some(entry) = entries.peek_mut(key)
            && entry.epoch == epoch
        {
            entry.is_fetching = true;
            if entry.data.is_none() {
                entry.status = QueryStatus::Loading;
            }
            entry.publish();
        }
    }

    /// Record the outcome of a fetch started under `epoch`.
    ///
    /// A result from a detached fetch (epoch bumped by invalidation) is kept
    /// but the entry stays invalidated, so the next read fetches again.
    pub fn complete_fetch(
        &self,
        key: &QueryKey,
        epoch: Epoch,
        result: &Result<AnyData, QueryError>,
        now: Instant,
    ) {
        let mut entries = rw_write(&self.entries, SOURCE, "complete_fetch");
        let Some(entry) = entries.peek_mut(key) else {
            debug!(key = %key, result = "dropped", "fetch finished after entry was removed");
            return;
        };

        let current = entry.epoch == epoch;
        if current {
            entry.is_fetching = false;
        }
        match result {
            Ok(data) => {
                entry.data = Some(data.clone());
                entry.error = None;
                entry.status = QueryStatus::Success;
                entry.updated_at = Some(OffsetDateTime::now_utc());
                entry.fetched_at = Some(now);
                entry.invalidated = !current;
            }
            Err(err) if current => {
                entry.error = Some(err.clone());
                entry.status = QueryStatus::Error;
            }
            Err(_) => {
                debug!(key = %key, result = "ignored", "detached fetch failed");
            }
        }
        entry.publish();
    }

    /// Mark every entry under `prefix` stale and detach running fetches.
    pub fn invalidate(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let keys = self.index.matching(prefix);
        if keys.is_empty() {
            return keys;
        }

        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        let mut touched = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = entries.peek_mut(&key) {
                entry.invalidated = true;
                entry.is_fetching = false;
                entry.epoch = self.next_epoch();
                entry.publish();
                touched.push(key);
            }
        }
        touched
    }

    // ========================================================================
    // Observers and garbage collection
    // ========================================================================

    pub fn observe(&self, key: &QueryKey) {
        if let Some(entry) = rw_write(&self.entries, SOURCE, "observe").peek_mut(key) {
            entry.observers += 1;
            entry.unobserved_since = None;
        }
    }

    /// Returns true when the last observer of `key` went away.
    pub fn release(&self, key: &QueryKey, now: Instant) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "release");
        let Some(entry) = entries.peek_mut(key) else {
            return false;
        };
        entry.observers = entry.observers.saturating_sub(1);
        if entry.observers == 0 {
            entry.unobserved_since = Some(now);
            return true;
        }
        false
    }

    pub fn is_observed(&self, key: &QueryKey) -> bool {
        rw_read(&self.entries, SOURCE, "is_observed")
            .peek(key)
            .is_some_and(|entry| entry.observers > 0)
    }

    /// Observed, stale entries whose options ask for a refetch on focus.
    pub fn focus_candidates(&self, now: Instant) -> Vec<QueryKey> {
        rw_read(&self.entries, SOURCE, "focus_candidates")
            .iter()
            .filter(|(_, entry)| {
                entry.observers > 0
                    && entry.options.refetch_on_focus
                    && entry.refetcher.is_some()
                    && entry.is_stale(now)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove entries nobody has observed for at least `gc_time`.
    pub fn collect_garbage(&self, now: Instant, gc_time: Duration) -> Vec<QueryKey> {
        let mut entries = rw_write(&self.entries, SOURCE, "collect_garbage");
        let expired: Vec<QueryKey> = entries
            .iter()
            .filter(|(_, entry)| {
                entry.observers == 0
                    && !entry.is_fetching
                    && entry
                        .unobserved_since
                        .is_some_and(|since| now.saturating_duration_since(since) >= gc_time)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
            self.index.unregister(key);
        }
        expired
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;

    use super::*;

    fn options() -> ResolvedOptions {
        ResolvedOptions {
            refetch_on_focus: false,
            retry_count: 0,
            stale_time: Duration::from_secs(30),
        }
    }

    fn ok<T: Send + Sync + 'static>(value: T) -> Result<AnyData, QueryError> {
        Ok(Arc::new(value))
    }

    fn stale_epoch(lookup: Lookup) -> Epoch {
        match lookup {
            Lookup::Stale { epoch } => epoch,
            Lookup::Fresh(_) => panic!("expected a stale lookup"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_roundtrip_serves_fresh_data() {
        let store = QueryStore::new(&CacheConfig::default());
        let key = QueryKey::resource("products").with(1);
        let now = Instant::now();

        let epoch = stale_epoch(store.prepare(&key, options(), None, now));
        store.begin_fetch(&key, epoch);
        assert_eq!(
            store.snapshot(&key).map(|s| s.status),
            Some(QueryStatus::Loading)
        );

        store.complete_fetch(&key, epoch, &ok(7u32), now);
        match store.lookup(&key, now) {
            Some(Lookup::Fresh(data)) => {
                assert_eq!(data.downcast_ref::<u32>(), Some(&7));
            }
            _ => panic!("expected fresh data"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn detached_result_is_kept_but_stale() {
        let store = QueryStore::new(&CacheConfig::default());
        let key = QueryKey::resource("categories").with(2);
        let now = Instant::now();

        let epoch = stale_epoch(store.prepare(&key, options(), None, now));
        store.begin_fetch(&key, epoch);
        let touched = store.invalidate(&QueryKey::resource("categories"));
        assert_eq!(touched, vec![key.clone()]);

        store.complete_fetch(&key, epoch, &ok("old"), now);
        let snapshot = store.snapshot(&key).expect("entry");
        assert!(snapshot.is_invalidated);
        assert!(snapshot.has_data());
        assert!(matches!(store.lookup(&key, now), Some(Lookup::Stale { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refetch_keeps_previous_data_next_to_error() {
        let store = QueryStore::new(&CacheConfig::default());
        let key = QueryKey::resource("users").with(3);
        let now = Instant::now();

        let epoch = stale_epoch(store.prepare(&key, options(), None, now));
        store.complete_fetch(&key, epoch, &ok(1u8), now);
        store.invalidate(&key);

        let epoch = stale_epoch(store.prepare(&key, options(), None, now));
        let err = QueryError::Transport(crate::transport::TransportError::Network("down".into()));
        store.complete_fetch(&key, epoch, &Err(err), now);

        let snapshot = store.snapshot(&key).expect("entry");
        assert_eq!(snapshot.status, QueryStatus::Error);
        assert!(snapshot.error.is_some());
        assert!(snapshot.has_data());
    }

    #[tokio::test(start_paused = true)]
    async fn lru_eviction_unregisters_keys() {
        let config = CacheConfig {
            max_entries: 2,
            ..Default::default()
        };
        let store = QueryStore::new(&config);
        let now = Instant::now();
        let first = QueryKey::resource("products").with(1);
        let second = QueryKey::resource("products").with(2);
        let third = QueryKey::resource("products").with(3);

        store.prepare(&first, options(), None, now);
        store.prepare(&second, options(), None, now);
        store.prepare(&third, options(), None, now);

        assert_eq!(store.len(), 2);
        assert!(store.snapshot(&first).is_none());
        assert_eq!(store.invalidate(&QueryKey::resource("products")).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_collection_skips_observed_entries() {
        let store = QueryStore::new(&CacheConfig::default());
        let now = Instant::now();
        let watched = QueryKey::resource("ratings").with(1);
        let idle = QueryKey::resource("ratings").with(2);
        store.prepare(&watched, options(), None, now);
        store.prepare(&idle, options(), None, now);
        store.observe(&watched);

        let gc_time = Duration::from_secs(60);
        assert!(store.collect_garbage(now, gc_time).is_empty());

        let later = now + gc_time;
        assert_eq!(store.collect_garbage(later, gc_time), vec![idle.clone()]);
        assert!(store.snapshot(&watched).is_some());

        store.release(&watched, later);
        assert!(store.collect_garbage(later, gc_time).is_empty());
        assert_eq!(
            store.collect_garbage(later + gc_time, gc_time),
            vec![watched]
        );
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn store_recovers_from_poisoned_lock() {
        let store = QueryStore::new(&CacheConfig::default());
        let key = QueryKey::resource("products");

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.prepare(&key, options(), None, Instant::now());
        assert!(store.snapshot(&key).is_some());
    }
}
