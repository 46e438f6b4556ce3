//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use admission_gateway::config::ShieldConfig;
use admission_gateway::lifecycle::Shutdown;
use admission_gateway::net::Listener;
use admission_gateway::observability::resources::MemoryProbe;
use admission_gateway::security::ClientKey;
use admission_gateway::{GatewayServer, Shield};
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use hyper::body::Frame;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Header the test key extractor reads.
pub const CLIENT_HEADER: &str = "x-test-client";

/// Memory probe that never moves, so tests stay off sysinfo.
pub struct FlatMemory;

impl MemoryProbe for FlatMemory {
    fn resident_bytes(&self) -> u64 {
        64 * 1024 * 1024
    }
}

/// Shield keyed by [`CLIENT_HEADER`] (`anonymous` when absent).
pub fn shield(config: ShieldConfig) -> Shield {
    Shield::builder(config)
        .key_extractor(|request: &Request<Body>| {
            request
                .headers()
                .get(CLIENT_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(ClientKey::new)
                .unwrap_or_else(|| ClientKey::new("anonymous"))
        })
        .memory_probe(Arc::new(FlatMemory))
        .build()
}

pub fn key(name: &str) -> ClientKey {
    ClientKey::new(name)
}

pub fn json_request(method: Method, uri: &str, client: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(CLIENT_HEADER, client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(CLIENT_HEADER, client)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), 1024 * 1024).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll until `shield` holds `expected` open requests for `client`.
pub async fn wait_for_in_flight(shield: &Shield, client: &str, expected: usize) {
    for _ in 0..2_000 {
        if shield.in_flight().count(&key(client)) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!(
        "expected {expected} open requests for {client}, found {}",
        shield.in_flight().count(&key(client))
    );
}

/// Request body that sends one chunk and then stalls forever.
pub struct Trickle {
    sent: bool,
}

impl Trickle {
    pub fn body() -> Body {
        Body::new(Trickle { sent: false })
    }
}

impl hyper::body::Body for Trickle {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.sent {
            Poll::Pending
        } else {
            self.sent = true;
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"{\"note\":")))))
        }
    }
}

/// Start a mock upstream that answers every connection with `response`.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                let response_str = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.len(),
                    response
                );
                let _ = socket.write_all(response_str.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A running gateway on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shield: Shield,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Serve `server` on 127.0.0.1 with the given connection ceiling.
pub async fn start_gateway(server: GatewayServer, max_connections: usize) -> TestGateway {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, max_connections);

    let shield = server.shield().clone();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestGateway {
        addr,
        shield,
        shutdown,
        handle,
    }
}

/// Gateway with `downstream` behind a header-keyed shield.
pub async fn start_with_downstream(config: ShieldConfig, downstream: Router) -> TestGateway {
    let server = GatewayServer::with_downstream(shield(config), downstream, Duration::from_secs(2));
    start_gateway(server, 1_000).await
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
