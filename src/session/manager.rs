//! Session lifecycle and the authenticated request pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use metrics::counter;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};
use vitrine_api_types::{AuthResponse, LoginInput, RefreshResponse, RegisterInput};

use super::state::{AuthSession, Identity, SessionError, SessionState};
use crate::api::forms;
use crate::transport::{ApiRequest, Transport, TransportError};

const REFRESH_PATH: &str = "refresh";
const LOGIN_PATH: &str = "login";
const REGISTER_PATH: &str = "register";
const LOGOUT_PATH: &str = "logout";

/// Holds the active credential and runs every API call through the
/// refresh-and-replay pipeline.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    state: watch::Sender<SessionState>,
    /// Bumped whenever the credential is replaced or cleared. Only written
    /// while the watch channel's lock is held.
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state.borrow().label())
            .field("generation", &self.generation.load(Ordering::Acquire))
            .finish()
    }
}

/// What a failed request saw when it was sent.
#[derive(Debug, Clone, Copy)]
struct Credential {
    generation: u64,
}

impl SessionManager {
    pub fn create(transport: Arc<dyn Transport>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Arc::new(Self {
            transport,
            state,
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity().cloned()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state
            .borrow()
            .session()
            .map(|session| session.access_token().to_string())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn snapshot(&self) -> (Option<String>, Credential) {
        let state = self.state.borrow();
        let token = state
            .session()
            .map(|session| session.access_token().to_string());
        let generation = self.generation.load(Ordering::Acquire);
        (token, Credential { generation })
    }

    /// Replace the state and bump the generation. With `expected`, only when
    /// no other credential change happened since it was observed.
    fn install(&self, expected: Option<u64>, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            let current = self.generation.load(Ordering::Acquire);
            if expected.is_some_and(|generation| generation != current) {
                return false;
            }
            self.generation.store(current + 1, Ordering::Release);
            *state = next;
            true
        })
    }

    fn mark_refreshing(&self, expected: u64) {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::Acquire) != expected {
                return false;
            }
            match state {
                SessionState::Authenticated(session) => {
                    *state = SessionState::Refreshing(session.clone());
                    true
                }
                _ => false,
            }
        });
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(SessionError::Disposed)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Recover a session from the refresh cookie. Leaves the manager
    /// unauthenticated on any failure.
    #[instrument(skip_all)]
    pub async fn restore(&self) -> Result<Identity, SessionError> {
        self.ensure_active()?;
        let (_, seen) = self.snapshot();
        let _refresh = self.refresh_lock.lock().await;
        let response = self.transport.send(&ApiRequest::get(REFRESH_PATH)).await;
        let outcome = response
            .map_err(SessionError::from)
            .and_then(decode::<RefreshResponse>)
            .and_then(full_session);
        match outcome {
            Ok(session) => {
                let identity = session.identity.clone();
                if self.install(Some(seen.generation), SessionState::Authenticated(session)) {
                    info!(user = %identity.username, result = "restored", "session restored");
                }
                Ok(identity)
            }
            Err(err) => {
                debug!(error = %err, result = "anonymous", "no session to restore");
                Err(err)
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn login(&self, input: &LoginInput) -> Result<Identity, SessionError> {
        self.ensure_active()?;
        forms::validate_login(input)?;
        let request = ApiRequest::post(LOGIN_PATH).json(input)?;
        self.authenticate(request, "login").await
    }

    #[instrument(skip_all)]
    pub async fn register(&self, input: &RegisterInput) -> Result<Identity, SessionError> {
        self.ensure_active()?;
        forms::validate_register(input)?;
        let request = ApiRequest::post(REGISTER_PATH).json(input)?;
        self.authenticate(request, "register").await
    }

    async fn authenticate(
        &self,
        request: ApiRequest,
        action: &'static str,
    ) -> Result<Identity, SessionError> {
        let value = self.transport.send(&request).await.inspect_err(|err| {
            warn!(action, error = %err, result = "rejected", "authentication failed");
        })?;
        let session = AuthSession::from(decode::<AuthResponse>(value)?);
        let identity = session.identity.clone();
        self.install(None, SessionState::Authenticated(session));
        info!(action, user = %identity.username, result = "authenticated", "session started");
        Ok(identity)
    }

    /// Clear the session immediately, then tell the server with the token
    /// that was active. Server errors are logged, never returned.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        let (token, _) = self.snapshot();
        self.install(None, SessionState::Unauthenticated);
        let Some(token) = token else {
            return;
        };
        info!(result = "logged_out", "session cleared");

        let mut request = ApiRequest::post(LOGOUT_PATH);
        request.bearer = Some(token);
        if let Err(err) = self.transport.send(&request).await {
            warn!(error = %err, result = "ignored", "logout request failed");
        }
    }

    /// Drop the credential and refuse further work.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.install(None, SessionState::Unauthenticated);
    }

    // ========================================================================
    // Request pipeline
    // ========================================================================

    /// Send `request` with the current bearer token.
    ///
    /// A 401 carrying the invalid-access-token message triggers one shared
    /// refresh; the request is then replayed once with the new token. When
    /// the refresh fails the session is cleared and the original error is
    /// returned. Every other failure passes through unchanged.
    #[instrument(
        name = "execute",
        skip_all,
        fields(request_id = %request.id, method = %request.method, path = %request.path)
    )]
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, TransportError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TransportError::invalid_request("session manager disposed"));
        }
        let mut request = request;
        let (token, seen) = self.snapshot();
        if !request.retried {
            request.bearer = token.clone();
        }

        let err = match self.transport.send(&request).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_invalid_access_token() || request.retried || token.is_none() {
            return Err(err);
        }

        let Some(fresh_token) = self.refresh_after(seen).await else {
            return Err(err);
        };
        request.retried = true;
        request.bearer = Some(fresh_token);
        debug!(result = "replay", "replaying request with refreshed token");
        self.transport.send(&request).await
    }

    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, TransportError> {
        let value = self.execute(request).await?;
        serde_json::from_value(value).map_err(|err| TransportError::Decode(err.to_string()))
    }

    pub async fn send_unit(&self, request: ApiRequest) -> Result<(), TransportError> {
        self.execute(request).await.map(|_| ())
    }

    /// Single-flight refresh. Callers that failed with an older credential
    /// than the current one reuse it instead of refreshing again.
    async fn refresh_after(&self, seen: Credential) -> Option<String> {
        let _refresh = self.refresh_lock.lock().await;
        let (token, current) = self.snapshot();
        if current.generation != seen.generation {
            counter!("vitrine_session_refresh_total", "result" => "shared").increment(1);
            return token;
        }

        self.mark_refreshing(seen.generation);
        let outcome = match self.transport.send(&ApiRequest::get(REFRESH_PATH)).await {
            Ok(value) => decode::<RefreshResponse>(value).and_then(|response| {
                let previous = self.state.borrow().session().cloned();
                refreshed_session(previous, response)
            }),
            Err(err) => Err(SessionError::from(err)),
        };

        match outcome {
            Ok(session) => {
                let fresh_token = session.access_token().to_string();
                if self.install(Some(seen.generation), SessionState::Authenticated(session)) {
                    counter!("vitrine_session_refresh_total", "result" => "success").increment(1);
                    info!(result = "refreshed", "access token refreshed");
                    Some(fresh_token)
                } else {
                    counter!("vitrine_session_refresh_total", "result" => "discarded").increment(1);
                    debug!(result = "discarded", "credential changed during refresh");
                    self.access_token()
                }
            }
            Err(err) => {
                counter!("vitrine_session_refresh_total", "result" => "failure").increment(1);
                if self.install(Some(seen.generation), SessionState::Unauthenticated) {
                    warn!(error = %err, result = "signed_out", "token refresh failed");
                }
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, SessionError> {
    serde_json::from_value(value)
        .map_err(|err| SessionError::Transport(TransportError::Decode(err.to_string())))
}

fn full_session(response: RefreshResponse) -> Result<AuthSession, SessionError> {
    match (response.id, response.username) {
        (Some(id), Some(username)) => Ok(AuthSession::new(
            Identity {
                id,
                username,
                roles: response.roles.unwrap_or_default(),
            },
            response.access_token,
        )),
        _ => Err(SessionError::MissingIdentity),
    }
}

/// A token-only response keeps the previous identity; a full one replaces it.
fn refreshed_session(
    previous: Option<AuthSession>,
    response: RefreshResponse,
) -> Result<AuthSession, SessionError> {
    if response.id.is_some() && response.username.is_some() {
        return full_session(response);
    }
    previous
        .map(|session| session.with_token(response.access_token))
        .ok_or(SessionError::MissingIdentity)
}
