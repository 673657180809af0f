//! Observer handles returned by `use_query`.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use super::client::{ClientInner, QueryClient};
use super::entry::{QueryState, QueryStatus, Snapshot, TypeMarker};
use super::error::QueryError;
use super::keys::QueryKey;

/// Counts as an observer of `key` until dropped.
pub(crate) struct ObserverGuard {
    inner: Arc<ClientInner>,
    key: QueryKey,
}

impl ObserverGuard {
    pub fn new(inner: Arc<ClientInner>, key: QueryKey) -> Self {
        Self { inner, key }
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if self.inner.store.release(&self.key, Instant::now()) {
            self.inner.schedule_gc();
        }
    }
}

/// Live view of one query.
///
/// Keeps the entry alive against garbage collection while held.
pub struct QueryHandle<T> {
    client: QueryClient,
    key: QueryKey,
    receiver: watch::Receiver<Snapshot>,
    _observer: ObserverGuard,
    _marker: TypeMarker<T>,
}

impl<T: Send + Sync + 'static> QueryHandle<T> {
    pub(crate) fn new(
        client: QueryClient,
        key: QueryKey,
        receiver: watch::Receiver<Snapshot>,
        observer: ObserverGuard,
    ) -> Self {
        Self {
            client,
            key,
            receiver,
            _observer: observer,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Latest published state.
    pub fn state(&self) -> QueryState<T> {
        QueryState::from_snapshot(&self.key, &self.receiver.borrow())
    }

    /// Raw snapshot stream for callers that fan out to their own tasks.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.receiver.clone()
    }

    /// Wait for the next state change. `None` once the entry is gone.
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.state())
    }

    /// Wait until no fetch is running and the entry has left `Idle`.
    pub async fn settled(&mut self) -> QueryState<T> {
        let key = self.key.clone();
        match self
            .receiver
            .wait_for(|snapshot| {
                !snapshot.is_fetching && snapshot.status != QueryStatus::Idle
            })
            .await
        {
            Ok(snapshot) => QueryState::from_snapshot(&key, &snapshot),
            Err(_) => QueryState::failed(QueryError::Aborted {
                key: key.to_string(),
                reason: "entry was removed while waiting".to_string(),
            }),
        }
    }

    /// Run the stored fetcher again regardless of freshness.
    pub async fn refetch(&self) -> QueryState<T> {
        match self.client.refetch::<T>(&self.key).await {
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
