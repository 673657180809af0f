use std::fmt;

use thiserror::Error;
use vitrine_api_types::AuthResponse;

use crate::api::ValidationError;
use crate::transport::TransportError;

pub const ADMIN_ROLE: &str = "ADMIN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

/// The signed-in account and its short-lived access token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub identity: Identity,
    access_token: String,
}

impl AuthSession {
    pub fn new(identity: Identity, access_token: impl Into<String>) -> Self {
        Self {
            identity,
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub(crate) fn with_token(&self, access_token: String) -> Self {
        Self {
            identity: self.identity.clone(),
            access_token,
        }
    }
}

impl From<AuthResponse> for AuthSession {
    fn from(response: AuthResponse) -> Self {
        Self {
            identity: Identity {
                id: response.id,
                username: response.username,
                roles: response.roles,
            },
            access_token: response.access_token,
        }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("identity", &self.identity)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated(AuthSession),
    /// A token refresh is running; the previous credential is kept until it
    /// resolves.
    Refreshing(AuthSession),
}

impl SessionState {
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            Self::Unauthenticated => None,
            Self::Authenticated(session) | Self::Refreshing(session) => Some(session),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session().map(|session| &session.identity)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self, Self::Refreshing(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated(_) => "authenticated",
            Self::Refreshing(_) => "refreshing",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("refresh response did not include the account identity")]
    MissingIdentity,
    #[error("session manager disposed")]
    Disposed,
}

impl SessionError {
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_token() {
        let session = AuthSession::new(
            Identity {
                id: 1,
                username: "ada".into(),
                roles: vec!["ADMIN".into()],
            },
            "secret-token",
        );
        let rendered = format!("{:?}", SessionState::Authenticated(session.clone()));
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("ada"));
        assert!(session.identity.is_admin());
    }
}
