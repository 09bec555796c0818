//! The ambient request a guest invocation runs on behalf of.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Request data visible to capability operations for one guest invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CoordinatedRequest {
    pub method: String,
    pub url: String,
    pub id: String,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub state: HashMap<String, Vec<u8>>,
}

impl CoordinatedRequest {
    /// Create a request with a fresh random id.
    pub fn new(method: impl Into<String>, url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            id: Uuid::new_v4().to_string(),
            body,
            ..Self::default()
        }
    }

    /// Look up a header, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing any existing entry that differs only in case.
    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.headers.retain(|name, _| !name.eq_ignore_ascii_case(key));
        self.headers.insert(key.to_string(), value.into());
    }

    /// The raw query string of `url`, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        let (_, query) = self.url.split_once('?')?;
        Some(query.split_once('#').map_or(query, |(q, _)| q))
    }

    /// Read a top-level key of a JSON object body.
    ///
    /// Strings are returned without quotes, other values as JSON text.
    /// `Ok(None)` means the body is an object without that key.
    pub fn body_field(&self, key: &str) -> Result<Option<Vec<u8>>, serde_json::Error> {
        let object = self.body_object()?;
        Ok(object.get(key).map(|value| match value {
            Value::String(s) => s.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }))
    }

    /// Set a top-level key of a JSON object body to a string value.
    ///
    /// An empty body is treated as an empty object.
    pub fn set_body_field(&mut self, key: &str, value: &str) -> Result<(), serde_json::Error> {
        let mut object = self.body_object()?;
        object.insert(key.to_string(), Value::String(value.to_string()));
        self.body = serde_json::to_vec(&Value::Object(object))?;
        Ok(())
    }

    fn body_object(&self) -> Result<Map<String, Value>, serde_json::Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        serde_json::from_slice(&self.body)
    }
}
