//! HTTP server setup.
//!
//! # Responsibilities
//! - Put the downstream (upstream forwarder or echo) behind the shield chain
//! - Wire up the outer layers (backstop timeout, request id, tracing)
//! - Serve each accepted connection with a header read deadline
//! - Apply shield settings from config reloads
//! - Drain open connections on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ConnectInfo,
    http::StatusCode,
    Router,
};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower::Service;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::middleware::Shield;
use crate::http::response::ShieldError;
use crate::http::upstream::{echo, forward, Upstream, UpstreamError};
use crate::lifecycle::ShutdownSignal;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;

/// Pause after a failed accept (usually fd exhaustion) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// The admission gateway.
pub struct GatewayServer {
    router: Router,
    shield: Shield,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl GatewayServer {
    /// Build the gateway from config. Requests go to `upstream.url` if set,
    /// otherwise to the echo handler.
    pub fn new(config: &GatewayConfig) -> Result<Self, UpstreamError> {
        let shield = Shield::new(config.shield.clone());
        let downstream = match Upstream::from_config(&config.upstream)? {
            Some(upstream) => {
                tracing::info!(upstream = %upstream.authority(), "Forwarding admitted requests");
                Router::new().fallback(forward).with_state(Arc::new(upstream))
            }
            None => {
                tracing::warn!("No upstream configured, answering with the echo handler");
                Router::new().fallback(echo)
            }
        };
        Ok(Self::with_downstream(shield, downstream, config.listener.drain_timeout()))
    }

    /// Put an arbitrary router behind `shield`.
    pub fn with_downstream(shield: Shield, downstream: Router, drain_timeout: Duration) -> Self {
        let router = Self::build_router(&shield, downstream);
        Self {
            router,
            shield,
            tracker: ConnectionTracker::new(),
            drain_timeout,
        }
    }

    /// Wrap `downstream` with the shield chain and the outer layers.
    ///
    /// The backstop timeout is fixed when the router is built; reloads only
    /// move the shield's own deadline.
    pub fn build_router(shield: &Shield, downstream: Router) -> Router {
        let backstop = shield.settings().backstop_timeout();
        shield
            .apply(downstream)
            .layer(TimeoutLayer::with_status_code(StatusCode::SERVICE_UNAVAILABLE, backstop))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn shield(&self) -> &Shield {
        &self.shield
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Apply the shield section of every reloaded config.
    pub fn watch_config(&self, mut updates: mpsc::UnboundedReceiver<GatewayConfig>) -> JoinHandle<()> {
        let shield = self.shield.clone();
        tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                shield.update(config.shield);
            }
        })
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "Gateway accepting connections");

        loop {
            let accepted = tokio::select! {
                reason = shutdown.recv() => {
                    tracing::info!(%reason, "Shutdown requested");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        }

        let open = self.tracker.active_count();
        tracing::info!(open_connections = open, "Stopped accepting, draining connections");
        self.tracker.begin_drain();
        if self.tracker.wait_idle(self.drain_timeout).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                open_connections = self.tracker.active_count(),
                drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                "Drain timed out, closing remaining connections"
            );
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let router = self.router.clone();
        let guard = self.tracker.track();
        let drain = self.tracker.drain_receiver();
        let header_timeout = self.shield.settings().header_timeout();

        tokio::spawn(async move {
            let _permit = permit;
            if !first_byte_within(&stream, peer, header_timeout).await {
                return;
            }

            let service = service_fn(move |mut request: hyper::Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                router.clone().call(request)
            });

            let mut builder = AutoBuilder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(header_timeout);

            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = draining(drain) => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            if let Err(e) = result {
                tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection closed with error");
            }
        });
    }
}

/// Version detection waits for the first bytes with no deadline of its own,
/// so a silent client would otherwise hold its socket forever.
async fn first_byte_within(stream: &TcpStream, peer: SocketAddr, deadline: Duration) -> bool {
    let mut first = [0u8; 1];
    match tokio::time::timeout(deadline, stream.peek(&mut first)).await {
        Ok(Ok(n)) => n > 0,
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer, error = %e, "Connection failed before first byte");
            false
        }
        Err(_) => {
            tracing::warn!(
                peer = %peer,
                timeout_ms = deadline.as_millis() as u64,
                "No request bytes before header deadline, closing connection"
            );
            metrics::record_rejection(ShieldError::SlowClient.reason());
            false
        }
    }
}

async fn draining(mut drain: watch::Receiver<bool>) {
    let _ = drain.wait_for(|draining| *draining).await;
}
