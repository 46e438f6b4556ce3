//! Timeout Guard stage.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::middleware::{reject, Shield};
use crate::http::response::ShieldError;
use crate::resilience::timeouts::{run_with_deadline, DeadlineOutcome};
use crate::security::ReleaseHooks;

/// Bound client-visible latency to the request timeout.
///
/// Inner stages attach their concurrency permits to the [`ReleaseHooks`] this
/// stage puts in the request extensions; they are released when the deadline
/// fires, or when this stage is dropped because the client went away.
pub async fn timeout_guard(
    State(shield): State<Shield>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let settings = shield.settings();
    let deadline = settings.request_timeout();
    let client = shield.client_key(&request, &settings);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let hooks = ReleaseHooks::default();
    request.extensions_mut().insert(hooks.clone());
    let _release = hooks.release_on_drop();

    match run_with_deadline(next.run(request), deadline).await {
        DeadlineOutcome::Completed(response) => response,
        DeadlineOutcome::TimedOut => {
            let released = hooks.release_all();
            tracing::warn!(
                client = %client,
                method = %method,
                path = %path,
                timeout_ms = settings.request_timeout_ms,
                released,
                "Request timed out, abandoning downstream work"
            );
            reject(ShieldError::Timeout)
        }
        DeadlineOutcome::Failed(e) => {
            tracing::error!(
                client = %client,
                method = %method,
                path = %path,
                error = %e,
                "Downstream task failed"
            );
            reject(ShieldError::Internal)
        }
    }
}
