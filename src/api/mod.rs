//! Typed storefront resources on top of the query cache and the session.
//!
//! Each resource module contributes key builders, cached reads and mutation
//! descriptors to [`Storefront`]. Every mutation declares the key prefixes
//! it makes stale:
//!
//! | mutation                | invalidates                               |
//! |-------------------------|-------------------------------------------|
//! | create product          | `products`, `admin-products`              |
//! | update product / images | `products/{id}`, `admin-products`         |
//! | delete product          | `products`, `admin-products`              |
//! | create / delete category| `categories`, `admin-categories`          |
//! | update category / thumb | `categories/{id}`, `admin-categories`     |
//! | set user active         | `users/{id}`, `admin-users`               |
//! | create / delete rating  | `ratings/{product_id}`                    |

pub mod categories;
pub mod forms;
pub mod products;
pub mod ratings;
pub mod users;

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;
use vitrine_api_types::{LoginInput, RegisterInput};

use crate::cache::{CacheConfig, MutationDescriptor, QueryClient, QueryError};
use crate::config::ApiSettings;
use crate::session::{Identity, SessionError, SessionManager};
use crate::transport::{ApiRequest, HttpTransport, TransportError};

pub use forms::{FieldIssue, NewCategory, NewProduct, ValidationError};

/// Default page size used by list endpoints when the caller sets none.
pub const DEFAULT_PAGE_SIZE: u32 = 12;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Query(err) => err.as_transport().and_then(TransportError::status_code),
            Self::Invalid(_) => None,
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        Self::Query(QueryError::from(err))
    }
}

/// Query client plus session, wired together for the storefront API.
#[derive(Clone, Debug)]
pub struct Storefront {
    queries: QueryClient,
    session: Arc<SessionManager>,
}

impl Storefront {
    pub fn new(queries: QueryClient, session: Arc<SessionManager>) -> Self {
        Self { queries, session }
    }

    /// Build the HTTP transport, session manager and query client.
    pub fn connect(api: &ApiSettings, cache: CacheConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&api.base_url, api.request_timeout)?;
        Ok(Self::new(
            QueryClient::create(cache),
            SessionManager::create(Arc::new(transport)),
        ))
    }

    /// Connect, then try once to resume the session held by the refresh
    /// cookie.
    pub async fn start(api: &ApiSettings, cache: CacheConfig) -> Result<Self, TransportError> {
        let storefront = Self::connect(api, cache)?;
        storefront.resume().await;
        Ok(storefront)
    }

    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn dispose(&self) {
        self.queries.dispose();
        self.session.dispose();
    }

    // ========================================================================
    // Auth
    // ========================================================================

    pub async fn restore(&self) -> Option<Identity> {
        self.session.restore().await.ok()
    }

    /// Startup restore. Never fails; an anonymous start is logged as such.
    pub async fn resume(&self) -> Option<Identity> {
        let identity = self.restore().await;
        match &identity {
            Some(identity) => {
                info!(user = %identity.username, result = "restored", "resumed previous session");
            }
            None => info!(result = "anonymous", "starting without a session"),
        }
        identity
    }

    pub async fn login(&self, input: &LoginInput) -> Result<Identity, SessionError> {
        self.session.login(input).await
    }

    pub async fn register(&self, input: &RegisterInput) -> Result<Identity, SessionError> {
        self.session.register(input).await
    }

    pub async fn logout(&self) {
        self.session.logout().await;
    }

    // ========================================================================
    // Plumbing shared by the resource modules
    // ========================================================================

    /// Fetcher for `GET path` with `params` encoded as query parameters.
    pub(crate) fn get_fetcher<T, P>(
        &self,
        path: String,
        params: P,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, TransportError>> + Send + Sync + 'static
    where
        T: DeserializeOwned + Send + 'static,
        P: Serialize + Send + Sync + 'static,
    {
        let session = Arc::clone(&self.session);
        move || {
            let session = Arc::clone(&session);
            let request = ApiRequest::get(path.clone()).params(&params);
            async move { session.send::<T>(request?).await }.boxed()
        }
    }

    /// Descriptor whose request is built from the input and whose response
    /// body is discarded.
    pub(crate) fn unit_mutation<I, F>(&self, name: &'static str, build: F) -> MutationDescriptor<I, ()>
    where
        I: Send + Sync + 'static,
        F: Fn(&I) -> Result<ApiRequest, TransportError> + Send + Sync + 'static,
    {
        let session = Arc::clone(&self.session);
        MutationDescriptor::new(name, move |input: &I| {
            let session = Arc::clone(&session);
            let request = build(input);
            async move { session.send_unit(request?).await }
        })
    }

    /// Validate, then run `descriptor` through the query client.
    pub(crate) async fn run_validated<I, O>(
        &self,
        descriptor: &MutationDescriptor<I, O>,
        input: I,
        validate: impl FnOnce(&I) -> Result<(), ValidationError>,
    ) -> Result<O, ApiError>
    where
        I: Send + Sync + 'static,
        O: Send + 'static,
    {
        validate(&input)?;
        Ok(self.queries.mutate(descriptor, input).await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::transport::Transport;

    type Handler = Box<dyn Fn(&ApiRequest) -> Result<Value, TransportError> + Send + Sync>;

    /// Transport answering every request from a closure and recording it.
    pub struct Recording {
        handler: Handler,
        pub log: Mutex<Vec<ApiRequest>>,
    }

    impl Recording {
        pub fn new(
            handler: impl Fn(&ApiRequest) -> Result<Value, TransportError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                handler: Box::new(handler),
                log: Mutex::new(Vec::new()),
            })
        }

        pub fn count(&self, method: &str, path: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|request| request.method.as_str() == method && request.path == path)
                .count()
        }

        pub fn last(&self) -> ApiRequest {
            self.log.lock().unwrap().last().cloned().expect("a request")
        }
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
            self.log.lock().unwrap().push(request.clone());
            (self.handler)(request)
        }
    }

    pub fn storefront(transport: Arc<Recording>) -> Storefront {
        Storefront::new(QueryClient::default(), SessionManager::create(transport))
    }
}
