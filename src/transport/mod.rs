//! Request transport for the storefront REST API.
//!
//! The [`Transport`] trait is the seam between the session pipeline and the
//! network; tests substitute scripted implementations for [`HttpTransport`].

mod error;
mod http;
mod request;

use async_trait::async_trait;
use serde_json::Value;

pub use error::{INVALID_ACCESS_TOKEN, TransportError};
pub use http::HttpTransport;
pub use request::{ApiRequest, FilePart, MultipartBody, RequestBody};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the decoded JSON body.
    ///
    /// Empty success bodies decode to `Value::Null`; non-2xx responses map to
    /// [`TransportError::Status`].
    async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError>;
}
