//! Downstream handlers for the bundled gateway binary.
//!
//! # Responsibilities
//! - Forward admitted, sanitized requests to the configured upstream
//! - Answer with an echo of the working copy when no upstream is set
//!
//! # Design Decisions
//! - One pooled hyper-util client shared by every request
//! - Hop-by-hop headers are not forwarded in either direction
//! - Upstream failures become 502; the shield chain still releases the slot

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header::{self, HeaderName},
        uri::{Authority, Scheme},
        HeaderMap, HeaderValue, Request, Uri,
    },
    response::{IntoResponse, Response},
    Json,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::json;
use thiserror::Error;

use crate::config::UpstreamConfig;
use crate::http::middleware::reject;
use crate::http::response::ShieldError;
use crate::security::RequestPayload;

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream url {0:?}")]
    InvalidUrl(String),
}

/// Pooled client pointed at a single upstream origin.
#[derive(Clone)]
pub struct Upstream {
    client: Client<HttpConnector, Body>,
    scheme: Scheme,
    authority: Authority,
}

impl Upstream {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, UpstreamError> {
        let uri = Uri::from_str(url).map_err(|_| UpstreamError::InvalidUrl(url.to_string()))?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| UpstreamError::InvalidUrl(url.to_string()))?;
        let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTP);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            scheme,
            authority,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Option<Self>, UpstreamError> {
        config
            .url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_millis(config.connect_timeout_ms)))
            .transpose()
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    fn target(&self, uri: &Uri) -> Option<Uri> {
        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some("/".parse().ok()?);
        }
        Uri::from_parts(parts).ok()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in HOP_BY_HOP.iter().chain(named.iter()).chain(std::iter::once(&KEEP_ALIVE)) {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {}", peer.ip()),
        None => peer.ip().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}

/// Send the request to the upstream and stream its response back.
pub async fn forward(State(upstream): State<Arc<Upstream>>, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let Some(uri) = upstream.target(&parts.uri) else {
        tracing::error!(path = %path, upstream = %upstream.authority, "Could not build upstream uri");
        return reject(ShieldError::BadGateway);
    };
    parts.uri = uri;
    strip_hop_by_hop(&mut parts.headers);
    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>().copied() {
        append_forwarded_for(&mut parts.headers, peer);
    }
    if let Ok(host) = HeaderValue::from_str(upstream.authority.as_str()) {
        parts.headers.insert(header::HOST, host);
    }

    match upstream.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(path = %path, upstream = %upstream.authority, error = %e, "Upstream error");
            reject(ShieldError::BadGateway)
        }
    }
}

/// Reflect the request's working copy back to the caller.
pub async fn echo(request: Request<Body>) -> Response {
    let payload = request.extensions().get::<RequestPayload>();
    Json(json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "query": request.uri().query(),
        "payload": payload.map(RequestPayload::view),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_target_and_keeps_path() {
        let upstream = Upstream::new("http://127.0.0.1:9000", Duration::from_secs(1)).unwrap();
        let uri: Uri = "/orders/7?expand=lines".parse().unwrap();
        let target = upstream.target(&uri).unwrap();
        assert_eq!(target.to_string(), "http://127.0.0.1:9000/orders/7?expand=lines");
    }

    #[test]
    fn rejects_url_without_host() {
        assert!(Upstream::new("/relative", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn extends_forwarded_for_chain() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1:5000".parse().unwrap());
        append_forwarded_for(&mut headers, "10.0.0.2:5000".parse().unwrap());
        assert_eq!(headers[&X_FORWARDED_FOR], "10.0.0.1, 10.0.0.2");
    }
}
