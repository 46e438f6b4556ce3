//! Slow-Client Guard stage.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::middleware::{reject, Shield};
use crate::http::response::ShieldError;
use crate::resilience::slow_client::{declared_length, receive_body, ReceiveError};

/// Receive the whole body within the read deadline, then hand a fully
/// buffered request to the next stage.
pub async fn slow_client_guard(
    State(shield): State<Shield>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = shield.settings();
    let client = shield.client_key(&request, &settings);
    let (parts, body) = request.into_parts();

    if declared_length(&parts.headers).is_some_and(|len| len > settings.max_body_bytes as u64) {
        tracing::warn!(
            client = %client,
            path = %parts.uri.path(),
            limit = settings.max_body_bytes,
            "Declared body length over limit"
        );
        return reject(ShieldError::PayloadTooLarge {
            limit: settings.max_body_bytes,
            unit: "bytes",
        });
    }

    match receive_body(body, settings.header_timeout(), settings.max_body_bytes).await {
        Ok(bytes) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Err(ReceiveError::Deadline(deadline)) => {
            tracing::warn!(
                client = %client,
                path = %parts.uri.path(),
                timeout_ms = deadline.as_millis() as u64,
                "Slow client, closing connection"
            );
            reject(ShieldError::SlowClient)
        }
        Err(ReceiveError::TooLarge(limit)) => {
            tracing::warn!(client = %client, path = %parts.uri.path(), limit, "Body over limit");
            reject(ShieldError::PayloadTooLarge { limit, unit: "bytes" })
        }
        Err(ReceiveError::Read(e)) => {
            tracing::debug!(client = %client, error = %e, "Failed to read request body");
            reject(ShieldError::InvalidRequest)
        }
    }
}
