use thiserror::Error;

/// Message the API sends with a 401 when the bearer token has expired or is
/// otherwise unusable. It is the only signal that triggers a token refresh.
pub const INVALID_ACCESS_TOKEN: &str = "Invalid Access Token";

/// Failure of a single request against the remote API.
///
/// Clonable so a single failed fetch can be handed to every reader that
/// joined it.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("server responded with status {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Status {
        status: u16,
        message: Option<String>,
        body: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn status(status: u16, message: Option<String>, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            message,
            body: body.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status code, when the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable message from the error body, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// True only for a 401 carrying the invalid-access-token message.
    pub fn is_invalid_access_token(&self) -> bool {
        matches!(
            self,
            Self::Status { status: 401, message: Some(message), .. } if message == INVALID_ACCESS_TOKEN
        )
    }

    /// Whether repeating the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidRequest(format!("invalid URL: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_access_token_requires_exact_status_and_message() {
        let expired = TransportError::status(401, Some(INVALID_ACCESS_TOKEN.to_string()), "");
        assert!(expired.is_invalid_access_token());

        let other_401 = TransportError::status(401, Some("Bad credentials".to_string()), "");
        assert!(!other_401.is_invalid_access_token());

        let forbidden = TransportError::status(403, Some(INVALID_ACCESS_TOKEN.to_string()), "");
        assert!(!forbidden.is_invalid_access_token());

        assert!(!TransportError::Network("reset".to_string()).is_invalid_access_token());
    }

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(TransportError::status(503, None, "").is_retryable());
        assert!(TransportError::status(429, None, "").is_retryable());
        assert!(!TransportError::status(404, None, "").is_retryable());
        assert!(!TransportError::status(401, None, "").is_retryable());
        assert!(!TransportError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn display_includes_server_message() {
        let err = TransportError::status(404, Some("Product not found".into()), "{}");
        assert_eq!(
            err.to_string(),
            "server responded with status 404: Product not found"
        );
    }
}
