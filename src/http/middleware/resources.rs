//! Resource Monitor stage.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::middleware::Shield;
use crate::observability::metrics;
use crate::observability::resources::emit_warnings;

/// Sample time and memory around the rest of the chain. Never rejects.
pub async fn resource_monitor(
    State(shield): State<Shield>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let sample = shield.monitor().begin();

    let response = next.run(request).await;

    if let Some(report) = sample.finish() {
        metrics::record_request(method.as_str(), response.status().as_u16(), report.elapsed);
        let settings = shield.settings();
        let thresholds = shield.thresholds(&settings);
        let warnings = report.warnings(thresholds);
        if !warnings.is_empty() {
            emit_warnings(method.as_str(), &path, &warnings, thresholds);
        }
    }

    response
}
