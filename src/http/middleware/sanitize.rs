//! Sanitizer stage.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::State,
    http::{header, uri::PathAndQuery, HeaderValue, Request, Uri},
    middleware::Next,
    response::Response,
};
use serde_json::Value;

use crate::http::middleware::payload::path_params;
use crate::http::middleware::{reject, Shield};
use crate::http::response::ShieldError;
use crate::security::{sanitize_value, RequestPayload};

fn with_query(uri: &Uri, query: Option<&str>) -> Option<Uri> {
    let path_and_query = match query {
        Some(q) => format!("{}?{}", uri.path(), q),
        None => uri.path().to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

/// Strip markup from every string in the request's working copy, and
/// optionally from JSON responses.
pub async fn sanitizer(
    State(shield): State<Shield>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = shield.settings();
    let (mut parts, body) = request.into_parts();

    let bytes = match to_bytes(body, settings.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %parts.uri.path(), error = %e, "Could not buffer body for sanitizing");
            return reject(ShieldError::InvalidRequest);
        }
    };

    let mut payload = match parts.extensions.remove::<RequestPayload>() {
        Some(payload) => payload,
        None => {
            let params = match path_params(&mut parts).await {
                Ok(params) => params,
                Err(_) => return reject(ShieldError::InvalidRequest),
            };
            match RequestPayload::parse(&parts.headers, &bytes, parts.uri.query(), params) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(path = %parts.uri.path(), error = %e, "Malformed payload");
                    return reject(ShieldError::InvalidRequest);
                }
            }
        }
    };

    let body_changed = sanitize_value(&mut payload.body);
    let query_changed = sanitize_value(&mut payload.query);
    let params_changed = sanitize_value(&mut payload.params);

    let body = if body_changed {
        match payload.encode_body() {
            Ok(Some(encoded)) => {
                parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
                encoded
            }
            Ok(None) => bytes,
            Err(e) => {
                tracing::error!(path = %parts.uri.path(), error = %e, "Failed to re-encode sanitized body");
                return reject(ShieldError::InvalidRequest);
            }
        }
    } else {
        bytes
    };

    if query_changed {
        match with_query(&parts.uri, payload.encode_query().as_deref()) {
            Some(uri) => parts.uri = uri,
            None => {
                tracing::error!(path = %parts.uri.path(), "Failed to rebuild sanitized query");
                return reject(ShieldError::InvalidRequest);
            }
        }
    }

    if body_changed || query_changed || params_changed {
        tracing::debug!(
            path = %parts.uri.path(),
            body = body_changed,
            query = query_changed,
            params = params_changed,
            "Sanitized request"
        );
    }

    parts.extensions.insert(payload);
    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    if settings.sanitize_responses {
        sanitize_response(response, settings.max_body_bytes).await
    } else {
        response
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("application/json") || v.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Apply the sanitizer to a JSON response body. Non-JSON responses pass
/// through untouched.
pub async fn sanitize_response(response: Response, max_bytes: usize) -> Response {
    if !is_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, max_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Could not buffer response for sanitizing");
            return reject(ShieldError::Internal);
        }
    };

    let mut value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };

    if !sanitize_value(&mut value) {
        return Response::from_parts(parts, Body::from(bytes));
    }

    match serde_json::to_vec(&value) {
        Ok(encoded) => {
            let encoded = Bytes::from(encoded);
            parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
            Response::from_parts(parts, Body::from(encoded))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to re-encode sanitized response");
            reject(ShieldError::Internal)
        }
    }
}
