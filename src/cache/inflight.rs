//! In-flight fetch registry.
//!
//! At most one fetch per key is registered at a time; readers that arrive
//! while it runs join the same shared future instead of starting another.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;

use super::entry::{AnyData, Epoch};
use super::error::QueryError;
use super::keys::QueryKey;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<AnyData, QueryError>>>;

struct Slot {
    epoch: Epoch,
    fetch: SharedFetch,
    abort: AbortHandle,
}

/// Outcome of [`InflightRegistry::join_or_start`].
pub(crate) enum Join {
    /// Another reader already started this fetch.
    Joined(SharedFetch),
    /// The caller's fetch was started and registered.
    Started(SharedFetch),
    /// The entry became fresh while waiting for the slot.
    Ready(AnyData),
}

#[derive(Default)]
pub(crate) struct InflightRegistry {
    slots: DashMap<QueryKey, Slot>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the fetch registered for `key` under `epoch`, or start a new one.
    ///
    /// `recheck` runs while the slot is locked and may short-circuit with
    /// data that became fresh since the caller last looked. `start` spawns
    /// the fetch; a slot left behind by an older epoch is replaced, a slot
    /// from a newer one is joined.
    pub fn join_or_start<R, S>(&self, key: &QueryKey, epoch: Epoch, recheck: R, start: S) -> Join
    where
        R: FnOnce() -> Option<AnyData>,
        S: FnOnce() -> (SharedFetch, AbortHandle),
    {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(occupied) if occupied.get().epoch >= epoch => {
                Join::Joined(occupied.get().fetch.clone())
            }
            Entry::Occupied(mut occupied) => {
                if let Some(data) = recheck() {
                    return Join::Ready(data);
                }
                let (fetch, abort) = start();
                occupied.insert(Slot {
                    epoch,
                    fetch: fetch.clone(),
                    abort,
                });
                Join::Started(fetch)
            }
            Entry::Vacant(vacant) => {
                if let Some(data) = recheck() {
                    return Join::Ready(data);
                }
                let (fetch, abort) = start();
                vacant.insert(Slot {
                    epoch,
                    fetch: fetch.clone(),
                    abort,
                });
                Join::Started(fetch)
            }
        }
    }

    /// Register a fetch only when nothing is running for `key`.
    pub fn try_start<S>(&self, key: &QueryKey, epoch: Epoch, start: S) -> Option<SharedFetch>
    where
        S: FnOnce() -> (SharedFetch, AbortHandle),
    {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let (fetch, abort) = start();
                vacant.insert(Slot {
                    epoch,
                    fetch: fetch.clone(),
                    abort,
                });
                Some(fetch)
            }
        }
    }

    /// Release the slot of a finished fetch unless it was already replaced.
    pub fn release(&self, key: &QueryKey, epoch: Epoch) {
        self.slots.remove_if(key, |_, slot| slot.epoch == epoch);
    }

    /// Forget running fetches for `keys`; they still finish on their own.
    pub fn detach(&self, keys: &[QueryKey]) -> usize {
        keys.iter()
            .filter(|key| self.slots.remove(*key).is_some())
            .count()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Abort every running fetch; used on dispose.
    pub fn abort_all(&self) {
        self.slots.retain(|_, slot| {
            slot.abort.abort();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;

    fn spawn_value(value: u32) -> (SharedFetch, AbortHandle) {
        let handle = tokio::spawn(async move { value });
        let abort = handle.abort_handle();
        let fetch = async move {
            handle
                .await
                .map(|value| Arc::new(value) as AnyData)
                .map_err(|err| QueryError::Aborted {
                    key: "test".into(),
                    reason: err.to_string(),
                })
        }
        .boxed()
        .shared();
        (fetch, abort)
    }

    #[tokio::test]
    async fn second_reader_joins_registered_fetch() {
        let registry = InflightRegistry::new();
        let key = QueryKey::resource("products");

        let first = registry.join_or_start(&key, 1, || None, || spawn_value(1));
        let second = registry.join_or_start(&key, 1, || None, || spawn_value(2));

        assert!(matches!(first, Join::Started(_)));
        let Join::Joined(fetch) = second else {
            panic!("second reader should join");
        };
        let data = fetch.await.expect("fetch");
        assert_eq!(data.downcast_ref::<u32>(), Some(&1));
    }

    #[tokio::test]
    async fn newer_epoch_replaces_detached_slot() {
        let registry = InflightRegistry::new();
        let key = QueryKey::resource("products");

        registry.join_or_start(&key, 1, || None, || spawn_value(1));
        let Join::Started(fetch) = registry.join_or_start(&key, 2, || None, || spawn_value(2))
        else {
            panic!("new epoch must start its own fetch");
        };
        assert_eq!(fetch.await.expect("fetch").downcast_ref::<u32>(), Some(&2));

        registry.release(&key, 1);
        assert!(registry.contains(&key), "stale release must not drop newer slot");
        registry.release(&key, 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn recheck_short_circuits_without_starting() {
        let registry = InflightRegistry::new();
        let key = QueryKey::resource("products");

        let joined = registry.join_or_start(
            &key,
            1,
            || Some(Arc::new(9u32) as AnyData),
            || panic!("must not start"),
        );
        assert!(matches!(joined, Join::Ready(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn try_start_ignores_occupied_slot() {
        let registry = InflightRegistry::new();
        let key = QueryKey::resource("products");

        assert!(registry.try_start(&key, 1, || spawn_value(1)).is_some());
        assert!(registry.try_start(&key, 1, || spawn_value(2)).is_none());
        assert_eq!(registry.detach(std::slice::from_ref(&key)), 1);
        assert!(registry.try_start(&key, 2, || spawn_value(3)).is_some());

        registry.abort_all();
        assert!(registry.is_empty());
    }
}
