use thiserror::Error;

use crate::{
    api::ApiError, cache::QueryError, config::LoadError, infra::error::InfraError,
    session::SessionError, transport::TransportError,
};

/// Top-level failure of a binary run.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// HTTP status behind the failure, when the server produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api(err) => err.status_code(),
            Self::Query(err) => err.as_transport().and_then(TransportError::status_code),
            Self::Transport(err) => err.status_code(),
            Self::Session(err) => err.as_transport().and_then(TransportError::status_code),
            _ => None,
        }
    }
}
