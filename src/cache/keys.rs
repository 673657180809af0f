//! Query key definitions.
//!
//! A `QueryKey` is an ordered list of JSON segments, conventionally starting
//! with the resource name: `["products", {"page": 0, "size": 10}]`. Equality,
//! hashing and prefix matching all run over a canonical encoding of every
//! segment, so two keys built from structurally equal values always collide.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::{Map, Number, Value};

use super::error::QueryError;

#[derive(Clone)]
pub struct QueryKey {
    segments: Vec<Value>,
    encoded: Vec<String>,
}

impl QueryKey {
    /// Key with a single resource-name segment, e.g. `["admin-categories"]`.
    pub fn resource(name: impl Into<String>) -> Self {
        Self::default_from(Value::String(name.into()))
    }

    /// Build a key from raw segments. An empty key is rejected.
    pub fn from_segments(segments: Vec<Value>) -> Result<Self, QueryError> {
        if segments.is_empty() {
            return Err(QueryError::InvalidKey(
                "a query key needs at least one segment".to_string(),
            ));
        }
        let segments: Vec<Value> = segments.into_iter().map(canonicalize).collect();
        let encoded = segments.iter().map(Value::to_string).collect();
        Ok(Self { segments, encoded })
    }

    /// Append a segment that already is a JSON value (ids, names, flags).
    pub fn with(mut self, segment: impl Into<Value>) -> Self {
        let segment = canonicalize(segment.into());
        self.encoded.push(segment.to_string());
        self.segments.push(segment);
        self
    }

    /// Append any serializable value, typically a filter object.
    pub fn try_with<T: Serialize + ?Sized>(self, segment: &T) -> Result<Self, QueryError> {
        let value = serde_json::to_value(segment)
            .map_err(|err| QueryError::InvalidKey(format!("segment is not serializable: {err}")))?;
        Ok(self.with(value))
    }

    pub fn segments(&self) -> &[Value] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resource name, when the first segment is a string.
    pub fn resource_name(&self) -> Option<&str> {
        self.segments.first().and_then(Value::as_str)
    }

    /// Canonical encoding of the first segment; the index bucket of a key.
    pub(crate) fn head(&self) -> &str {
        self.encoded.first().map_or("", String::as_str)
    }

    /// True when every segment of `self` equals the same position in `other`.
    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        self.encoded.len() <= other.encoded.len()
            && self
                .encoded
                .iter()
                .zip(&other.encoded)
                .all(|(mine, theirs)| mine == theirs)
    }

    fn default_from(first: Value) -> Self {
        let first = canonicalize(first);
        Self {
            encoded: vec![first.to_string()],
            segments: vec![first],
        }
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.encoded.join(","))
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey{self}")
    }
}

/// Recursively sort object fields and fold integral floats into integers.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(name, value)| (name, canonicalize(value)))
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Number(number) => Value::Number(canonical_number(number)),
        other => other,
    }
}

fn canonical_number(number: Number) -> Number {
    if number.is_f64()
        && let Some(float) = number.as_f64()
        && float.fract() == 0.0
        && float.abs() < 9_007_199_254_740_992.0
    {
        return Number::from(float as i64);
    }
    number
}
