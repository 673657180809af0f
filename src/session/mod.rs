//! Auth session manager.
//!
//! Owns the single active credential, attaches it to outgoing requests and
//! recovers from expired access tokens with one shared refresh call followed
//! by a single replay of each failed request.
//!
//! State changes (`Unauthenticated`, `Authenticated`, `Refreshing`) are
//! published through a `tokio::sync::watch` channel; see
//! [`SessionManager::subscribe`].

mod manager;
mod state;

pub use manager::SessionManager;
pub use state::{ADMIN_ROLE, AuthSession, Identity, SessionError, SessionState};
