//! Concurrency Limiter stage.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::middleware::{reject, Shield};
use crate::http::response::ShieldError;
use crate::security::ReleaseHooks;

/// Admit the request if its key is under the per-key ceiling.
pub async fn concurrency_limiter(
    State(shield): State<Shield>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = shield.settings();
    let key = shield.client_key(&request, &settings);
    let limit = settings.max_concurrent_per_key;

    let Some(permit) = shield.in_flight().try_acquire(&key, limit) else {
        tracing::warn!(
            client = %key,
            method = %request.method(),
            path = %request.uri().path(),
            limit,
            "Concurrent request limit reached"
        );
        return reject(ShieldError::Overloaded);
    };

    if let Some(hooks) = request.extensions().get::<ReleaseHooks>() {
        hooks.attach(permit.clone());
    }

    let response = next.run(request).await;
    permit.release();
    response
}
