use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url, header::AUTHORIZATION, multipart};
use serde_json::Value;
use tracing::debug;
use vitrine_api_types::ErrorResponse;

use super::{ApiRequest, RequestBody, Transport, TransportError};

/// `reqwest`-backed transport for the storefront REST API.
///
/// The client keeps a cookie jar so the refresh credential the server sets on
/// login travels with later refresh calls.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base: normalize_base(base_url)?,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("vitrine/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url(&self, request: &ApiRequest) -> Result<Url, TransportError> {
        let mut url = self.base.join(request.path.trim_start_matches('/'))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn handle(response: Response) -> Result<Value, TransportError> {
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            let message = serde_json::from_slice::<ErrorResponse>(&bytes)
                .ok()
                .and_then(|parsed| parsed.message);
            return Err(TransportError::status(status.as_u16(), message, body));
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let url = self.url(request)?;
        debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            retried = request.retried,
            "sending api request"
        );

        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(token) = &request.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Multipart(body)) => {
                let mut form = multipart::Form::new();
                for (name, value) in &body.fields {
                    form = form.text(name.clone(), value.clone());
                }
                for file in &body.files {
                    let mut part =
                        multipart::Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
                    if let Some(content_type) = &file.content_type {
                        part = part.mime_str(content_type)?;
                    }
                    form = form.part(file.field.clone(), part);
                }
                builder.multipart(form)
            }
            None => builder,
        };

        let response = builder.send().await?;
        Self::handle(response).await
    }
}

fn normalize_base(base: &Url) -> Result<Url, TransportError> {
    if base.cannot_be_a_base() {
        return Err(TransportError::invalid_request(format!(
            "`{base}` cannot be used as an API base URL"
        )));
    }
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}
