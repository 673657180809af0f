//! Mutations: one-shot writes that invalidate related queries on success.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use super::client::QueryClient;
use super::error::QueryError;
use super::keys::QueryKey;
use super::notice::Notice;

type Execute<I, O> = Arc<dyn Fn(&I) -> BoxFuture<'static, Result<O, QueryError>> + Send + Sync>;
type Invalidates<I, O> = Arc<dyn Fn(&I, &O) -> Vec<QueryKey> + Send + Sync>;

/// Describes a write: how to run it and which query prefixes it makes stale.
///
/// Holds no state between calls; one descriptor can serve any number of
/// concurrent mutations.
pub struct MutationDescriptor<I, O> {
    name: &'static str,
    execute: Execute<I, O>,
    invalidates: Invalidates<I, O>,
    success_message: Option<String>,
}

impl<I, O> Clone for MutationDescriptor<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            execute: Arc::clone(&self.execute),
            invalidates: Arc::clone(&self.invalidates),
            success_message: self.success_message.clone(),
        }
    }
}

impl<I, O> MutationDescriptor<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    /// `execute` builds the request from the borrowed input and returns a
    /// future that owns everything it needs.
    pub fn new<F, Fut, E>(name: &'static str, execute: F) -> Self
    where
        F: Fn(&I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        E: Into<QueryError>,
    {
        Self {
            name,
            execute: Arc::new(move |input: &I| {
                let pending = execute(input);
                async move { pending.await.map_err(Into::<QueryError>::into) }.boxed()
            }),
            invalidates: Arc::new(|_: &I, _: &O| Vec::new()),
            success_message: None,
        }
    }

    /// Prefixes to invalidate once the write succeeded.
    pub fn invalidates<F>(mut self, keys: F) -> Self
    where
        F: Fn(&I, &O) -> Vec<QueryKey> + Send + Sync + 'static,
    {
        self.invalidates = Arc::new(keys);
        self
    }

    pub fn success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl QueryClient {
    /// Run `descriptor` once with `input`.
    ///
    /// On success every prefix from the descriptor is invalidated before this
    /// returns, so a query issued afterwards never sees pre-write data. On
    /// failure the cache is left untouched.
    #[instrument(name = "mutate", skip_all, fields(mutation = descriptor.name))]
    pub async fn mutate<I, O>(
        &self,
        descriptor: &MutationDescriptor<I, O>,
        input: I,
    ) -> Result<O, QueryError>
    where
        I: Send + Sync + 'static,
        O: Send + 'static,
    {
        self.inner.ensure_active()?;
        match (descriptor.execute)(&input).await {
            Ok(output) => {
                let prefixes = (descriptor.invalidates)(&input, &output);
                let invalidated: usize = prefixes.iter().map(|prefix| self.invalidate(prefix)).sum();
                info!(
                    mutation = descriptor.name,
                    prefixes = prefixes.len(),
                    invalidated,
                    result = "success",
                    "mutation succeeded"
                );
                if let Some(message) = &descriptor.success_message {
                    self.notify(Notice::success(descriptor.name, message.clone()));
                }
                Ok(output)
            }
            Err(err) => {
                warn!(mutation = descriptor.name, error = %err, result = "error", "mutation failed");
                self.notify(Notice::error(descriptor.name, err.to_string()));
                Err(err)
            }
        }
    }

    pub fn use_mutation<I, O>(&self, descriptor: MutationDescriptor<I, O>) -> MutationHandle<I, O>
    where
        I: Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(MutationState::Idle);
        MutationHandle {
            client: self.clone(),
            descriptor,
            state,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MutationState<O> {
    Idle,
    Pending,
    Success(O),
    Error(QueryError),
}

impl<O> MutationState<O> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Reactive wrapper around a descriptor for one UI collaborator.
pub struct MutationHandle<I, O> {
    client: QueryClient,
    descriptor: MutationDescriptor<I, O>,
    state: watch::Sender<MutationState<O>>,
}

impl<I, O> MutationHandle<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub async fn mutate(&self, input: I) -> Result<O, QueryError> {
        self.state.send_replace(MutationState::Pending);
        let result = self.client.mutate(&self.descriptor, input).await;
        self.state.send_replace(match &result {
            Ok(output) => MutationState::Success(output.clone()),
            Err(err) => MutationState::Error(err.clone()),
        });
        result
    }

    pub fn state(&self) -> MutationState<O> {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<O>> {
        self.state.subscribe()
    }

    pub fn reset(&self) {
        self.state.send_replace(MutationState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::{NoticeLevel, QueryOptions};
    use crate::transport::TransportError;

    #[derive(Debug, Clone)]
    struct NewCategory {
        name: String,
    }

    fn create_category(
        calls: &Arc<AtomicUsize>,
        fail: bool,
    ) -> MutationDescriptor<NewCategory, u64> {
        let calls = Arc::clone(calls);
        MutationDescriptor::new("create_category", move |input: &NewCategory| {
            calls.fetch_add(1, Ordering::SeqCst);
            let name = input.name.clone();
            async move {
                if fail {
                    Err(TransportError::status(
                        409,
                        Some(format!("{name} already exists")),
                        "",
                    ))
                } else {
                    Ok(7u64)
                }
            }
        })
        .invalidates(|_, _| {
            vec![
                QueryKey::resource("admin-categories"),
                QueryKey::resource("categories"),
            ]
        })
        .success_message("Category created successfully")
    }

    #[tokio::test(start_paused = true)]
    async fn query_after_mutation_never_returns_pre_mutation_value() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::resource("admin-categories").with(json!({"page": 0, "size": 10}));
        let version = Arc::new(AtomicUsize::new(1));

        let fetch = {
            let version = Arc::clone(&version);
            move || {
                let current = version.load(Ordering::SeqCst);
                async move { Ok::<_, QueryError>(current) }
            }
        };
        let before = client
            .fetch_query(key.clone(), fetch.clone(), QueryOptions::new())
            .await
            .expect("first read");
        assert_eq!(*before, 1);

        version.store(2, Ordering::SeqCst);
        let id = client
            .mutate(
                &create_category(&calls, false),
                NewCategory {
                    name: "Lamps".into(),
                },
            )
            .await
            .expect("created");
        assert_eq!(id, 7);

        let after = client
            .fetch_query(key, fetch, QueryOptions::new())
            .await
            .expect("second read");
        assert_eq!(*after, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_mutation_leaves_cache_untouched_and_publishes_error() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::resource("admin-categories").with(json!({"page": 0}));
        client
            .fetch_query(key.clone(), || async { Ok::<_, QueryError>(1u8) }, QueryOptions::new())
            .await
            .expect("read");
        let mut notices = client.notices();

        let err = client
            .mutate(
                &create_category(&calls, true),
                NewCategory {
                    name: "Lamps".into(),
                },
            )
            .await
            .expect_err("conflict");

        assert_eq!(
            err.as_transport().and_then(TransportError::status_code),
            Some(409)
        );
        assert!(client.query_state::<u8>(&key).is_some_and(|s| !s.is_invalidated));
        let notice = notices.recv().await.expect("notice");
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("Lamps already exists"));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_tracks_state_and_success_notice() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut notices = client.notices();
        let handle = client.use_mutation(create_category(&calls, false));
        assert!(matches!(handle.state(), MutationState::Idle));

        handle
            .mutate(NewCategory {
                name: "Chairs".into(),
            })
            .await
            .expect("created");
        assert!(matches!(handle.state(), MutationState::Success(7)));

        let notice = notices.recv().await.expect("notice");
        assert_eq!(notice.level, NoticeLevel::Success);
        assert_eq!(notice.message, "Category created successfully");
        assert_eq!(notice.mutation, "create_category");

        handle.reset();
        assert!(!handle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn each_call_executes_once() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let descriptor = create_category(&calls, false);

        for name in ["a", "b", "c"] {
            client
                .mutate(&descriptor, NewCategory { name: name.into() })
                .await
                .expect("created");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
