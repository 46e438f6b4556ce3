//! Client identity used to bucket admission-control state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{body::Body, extract::ConnectInfo, http::Request};

use crate::config::ShieldConfig;

/// Key shared by requests that count against the same budget.
///
/// Normally the peer IP. Not authenticated: a client that controls
/// `X-Forwarded-For` can pick its own key when that header is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(Arc<str>);

impl ClientKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Bucket for requests with no resolvable identity.
    pub fn unknown() -> Self {
        Self::new("unknown")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives a [`ClientKey`] from an inbound request.
pub trait KeyExtractor: Send + Sync + 'static {
    fn extract(&self, request: &Request<Body>, config: &ShieldConfig) -> ClientKey;
}

/// Peer IP, optionally overridden by the first `X-Forwarded-For` hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddress;

impl KeyExtractor for PeerAddress {
    fn extract(&self, request: &Request<Body>, config: &ShieldConfig) -> ClientKey {
        if config.trust_forwarded_for {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(hop) = forwarded {
                return ClientKey::new(hop);
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| ClientKey::new(addr.ip().to_string()))
            .unwrap_or_else(ClientKey::unknown)
    }
}

impl<F> KeyExtractor for F
where
    F: Fn(&Request<Body>) -> ClientKey + Send + Sync + 'static,
{
    fn extract(&self, request: &Request<Body>, _config: &ShieldConfig) -> ClientKey {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(addr: &str) -> Request<Body> {
        let mut req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn uses_peer_ip_by_default() {
        let key = PeerAddress.extract(&request_from("192.0.2.7:5555"), &ShieldConfig::default());
        assert_eq!(key.as_str(), "192.0.2.7");
    }

    #[test]
    fn trusts_forwarded_for_when_enabled() {
        let config = ShieldConfig {
            trust_forwarded_for: true,
            ..Default::default()
        };
        let key = PeerAddress.extract(&request_from("192.0.2.7:5555"), &config);
        assert_eq!(key.as_str(), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_unknown() {
        let req = Request::new(Body::empty());
        assert_eq!(
            PeerAddress.extract(&req, &ShieldConfig::default()),
            ClientKey::unknown()
        );
    }

    #[test]
    fn closures_are_extractors() {
        let by_header = |req: &Request<Body>| {
            req.headers()
                .get("x-tenant")
                .and_then(|v| v.to_str().ok())
                .map(ClientKey::new)
                .unwrap_or_else(ClientKey::unknown)
        };
        let req = Request::builder()
            .header("x-tenant", "acme")
            .body(Body::empty())
            .unwrap();
        assert_eq!(by_header.extract(&req, &ShieldConfig::default()).as_str(), "acme");
    }
}
