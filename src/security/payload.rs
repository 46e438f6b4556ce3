//! Structured view of a request's body, query string and path params.
//!
//! JSON bodies are parsed with serde_json; urlencoded bodies and query strings
//! become objects of strings (repeated keys collect into an array). Anything
//! else is opaque and travels downstream untouched.

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use serde_json::{Map, Value};
use thiserror::Error;
use url::form_urlencoded;

use crate::security::inspect::CombinedView;

/// How the body was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Json,
    Form,
    Opaque,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed JSON body: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

/// The inspected working copy of a request, kept in request extensions so
/// handlers can read the sanitized params.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub kind: BodyKind,
    pub body: Value,
    pub query: Value,
    pub params: Value,
}

impl RequestPayload {
    pub fn parse(
        headers: &HeaderMap,
        body: &[u8],
        query: Option<&str>,
        params: Value,
    ) -> Result<Self, PayloadError> {
        let (kind, body) = parse_body(headers, body)?;
        Ok(Self {
            kind,
            body,
            query: query.map(parse_form).unwrap_or_else(|| Value::Object(Map::new())),
            params,
        })
    }

    /// Borrowed view handed to the inspector.
    pub fn view(&self) -> CombinedView<'_> {
        CombinedView {
            body: &self.body,
            query: &self.query,
            params: &self.params,
        }
    }

    /// Re-encode the body for downstream. `None` means the original bytes
    /// should be kept.
    pub fn encode_body(&self) -> Result<Option<Bytes>, serde_json::Error> {
        match self.kind {
            BodyKind::Json => Ok(Some(Bytes::from(serde_json::to_vec(&self.body)?))),
            BodyKind::Form => Ok(Some(Bytes::from(encode_form(&self.body)))),
            BodyKind::Empty | BodyKind::Opaque => Ok(None),
        }
    }

    /// Re-encode the query string; `None` when there are no query pairs.
    pub fn encode_query(&self) -> Option<String> {
        match &self.query {
            Value::Object(map) if !map.is_empty() => Some(encode_form(&self.query)),
            _ => None,
        }
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
}

/// Parse a body according to its content type.
pub fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<(BodyKind, Value), PayloadError> {
    if body.is_empty() {
        return Ok((BodyKind::Empty, Value::Null));
    }

    match content_type(headers).as_deref() {
        Some(ct) if ct == "application/json" || ct.ends_with("+json") => {
            Ok((BodyKind::Json, serde_json::from_slice(body)?))
        }
        Some("application/x-www-form-urlencoded") => {
            let text = String::from_utf8_lossy(body);
            Ok((BodyKind::Form, parse_form(&text)))
        }
        _ => Ok((BodyKind::Opaque, Value::Null)),
    }
}

/// Decode `a=1&b=2&b=3` into `{"a":"1","b":["2","3"]}`.
pub fn parse_form(input: &str) -> Value {
    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(input.as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(map)
}

/// Inverse of [`parse_form`] for flat objects; nested values are written as
/// their JSON text.
pub fn encode_form(value: &Value) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());
    if let Value::Object(map) = value {
        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    for item in items {
                        out.append_pair(key, &scalar_text(item));
                    }
                }
                other => {
                    out.append_pair(key, &scalar_text(other));
                }
            }
        }
    }
    out.finish()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
