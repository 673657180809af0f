use thiserror::Error;

use crate::transport::TransportError;

/// Failure surfaced by a query or mutation.
///
/// Clonable because one fetch result is shared by every reader that joined it.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid query key: {0}")]
    InvalidKey(String),
    #[error("cached data for {key} has a different type than requested")]
    TypeMismatch { key: String },
    #[error("fetch for {key} was aborted: {reason}")]
    Aborted { key: String, reason: String },
    #[error("query client has been disposed")]
    Disposed,
}

impl QueryError {
    /// Only transport failures that a second attempt could fix are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }

    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}
