//! Payload/Pattern Guard stage.

use axum::{
    body::{to_bytes, Body},
    extract::{rejection::RawPathParamsRejection, FromRequestParts, RawPathParams, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use serde_json::{Map, Value};

use crate::http::middleware::{reject, Shield};
use crate::http::response::ShieldError;
use crate::security::{InspectError, RequestPayload};

/// Matched route params as a JSON object. Missing params (no parameterised
/// route, or the fallback) are an empty object.
pub(crate) async fn path_params(parts: &mut Parts) -> Result<Value, RawPathParamsRejection> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => Ok(Value::Object(
            params
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
        )),
        Err(RawPathParamsRejection::MissingPathParams(_)) => Ok(Value::Object(Map::new())),
        Err(rejection) => Err(rejection),
    }
}

/// Reject oversized or suspicious payloads before downstream sees them.
///
/// The parsed payload is stored in the request extensions for the sanitizer.
pub async fn payload_guard(
    State(shield): State<Shield>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = shield.settings();
    let client = shield.client_key(&request, &settings);
    let (mut parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let bytes = match to_bytes(body, settings.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(client = %client, path = %path, error = %e, "Could not buffer body for inspection");
            return reject(ShieldError::InvalidRequest);
        }
    };

    let params = match path_params(&mut parts).await {
        Ok(params) => params,
        Err(e) => {
            tracing::warn!(client = %client, path = %path, error = %e, "Unreadable path params");
            return reject(ShieldError::InvalidRequest);
        }
    };

    let payload = match RequestPayload::parse(&parts.headers, &bytes, parts.uri.query(), params) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(client = %client, path = %path, error = %e, "Malformed payload");
            return reject(ShieldError::InvalidRequest);
        }
    };

    let inspector = shield.inspector(&settings);
    if let Err(err) = inspector.inspect(&payload.view()) {
        return match err {
            InspectError::TooManyItems { limit, found } => {
                tracing::warn!(client = %client, path = %path, limit, found, "Array over item limit");
                reject(ShieldError::PayloadTooLarge {
                    limit,
                    unit: "array items",
                })
            }
            InspectError::TooDeep { limit } => {
                tracing::warn!(client = %client, path = %path, limit, "Payload nested too deeply");
                reject(ShieldError::InvalidRequest)
            }
            InspectError::Pattern(rule) => {
                tracing::warn!(
                    client = %client,
                    path = %path,
                    rule = rule.id,
                    category = %rule.category,
                    "Suspicious pattern detected"
                );
                reject(ShieldError::InvalidRequest)
            }
            InspectError::Render(e) => {
                tracing::error!(client = %client, path = %path, error = %e, "Payload inspection failed");
                reject(ShieldError::InvalidRequest)
            }
        };
    }

    parts.extensions.insert(payload);
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
