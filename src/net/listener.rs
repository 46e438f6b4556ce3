//! TCP listener with a connection ceiling.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce `max_connections` via a semaphore

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("listener closed")]
    Closed,
}

/// A bounded TCP listener.
///
/// When `max_connections` sockets are open, [`accept`](Self::accept) waits
/// for one of them to close before taking the next connection.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Ok(Self::from_tcp(listener, config.max_connections))
    }

    /// Wrap an already bound socket.
    pub fn from_tcp(inner: TcpListener, max_connections: usize) -> Self {
        if let Ok(local_addr) = inner.local_addr() {
            tracing::info!(address = %local_addr, max_connections, "Listener bound");
        }
        Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a connection. The returned permit must live as long as the
    /// connection does.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot, returned to the listener on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
