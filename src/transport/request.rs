//! Transport-independent request description.
//!
//! Requests are plain data so the session pipeline can replay them after a
//! token refresh; multipart bodies are rebuilt on every send.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::error::TransportError;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Correlation id carried in logs; a replay keeps the id of the original.
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub bearer: Option<String>,
    /// Set once the request has been replayed after a refresh.
    pub retried: bool,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Multipart(MultipartBody),
}

#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

#[derive(Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for FilePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePart")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Append every field of `params` as query parameters.
    ///
    /// Arrays are encoded as repeated keys (`categoryIds=1&categoryIds=2`),
    /// nulls are skipped.
    pub fn params<T: Serialize>(mut self, params: &T) -> Result<Self, TransportError> {
        let value = serde_json::to_value(params)
            .map_err(|err| TransportError::invalid_request(err.to_string()))?;
        match value {
            Value::Object(map) => {
                for (name, value) in map {
                    push_query_value(&mut self.query, &name, value);
                }
                Ok(self)
            }
            Value::Null => Ok(self),
            other => Err(TransportError::invalid_request(format!(
                "query parameters must serialize to an object, got {other}"
            ))),
        }
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, TransportError> {
        let value = serde_json::to_value(body)
            .map_err(|err| TransportError::invalid_request(err.to_string()))?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    pub fn multipart(mut self, body: MultipartBody) -> Self {
        self.body = Some(RequestBody::Multipart(body));
        self
    }

    /// Copy of this request with a new correlation id and no auth state,
    /// used when a stored fetcher is run again.
    pub fn fresh(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            bearer: None,
            retried: false,
            ..self.clone()
        }
    }
}

fn push_query_value(query: &mut Vec<(String, String)>, name: &str, value: Value) {
    match value {
        Value::Null => {}
        Value::String(text) => query.push((name.to_string(), text)),
        Value::Array(items) => {
            for item in items {
                push_query_value(query, name, item);
            }
        }
        other => query.push((name.to_string(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn params_repeat_array_keys_and_skip_nulls() {
        let request = ApiRequest::get("products")
            .params(&json!({
                "name": "lamp",
                "categoryIds": [1, 2],
                "maxPrice": null,
                "page": 0,
            }))
            .expect("object params");

        assert!(request.query.contains(&("name".into(), "lamp".into())));
        assert!(request.query.contains(&("categoryIds".into(), "1".into())));
        assert!(request.query.contains(&("categoryIds".into(), "2".into())));
        assert!(request.query.contains(&("page".into(), "0".into())));
        assert!(!request.query.iter().any(|(name, _)| name == "maxPrice"));
    }

    #[test]
    fn params_rejects_non_objects() {
        let err = ApiRequest::get("products")
            .params(&json!([1, 2]))
            .expect_err("arrays are not parameter maps");
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[test]
    fn fresh_copy_drops_auth_state() {
        let mut request = ApiRequest::get("users/1");
        request.bearer = Some("token".into());
        request.retried = true;

        let copy = request.fresh();
        assert_ne!(copy.id, request.id);
        assert!(copy.bearer.is_none());
        assert!(!copy.retried);
        assert_eq!(copy.path, "users/1");
    }
}
