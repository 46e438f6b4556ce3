//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Count open connections and publish the gauge
//! - Give each connection an id for tracing
//! - Tell live connections to drain, then wait for them to close

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::observability::metrics;

/// Relaxed ordering is enough; ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks open connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    drain_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            drain_tx: Arc::new(tx),
        }
    }

    /// Record a new connection. The returned guard closes it on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Receiver that flips to `true` once draining starts.
    pub fn drain_receiver(&self) -> watch::Receiver<bool> {
        self.drain_tx.subscribe()
    }

    /// Ask every live connection to finish its current request and close.
    pub fn begin_drain(&self) {
        self.drain_tx.send_replace(true);
    }

    pub fn is_draining(&self) -> bool {
        *self.drain_tx.borrow()
    }

    /// Wait until every connection has closed or `grace` elapses. Returns
    /// whether the gateway drained cleanly.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let poll = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(grace, poll).await.is_ok()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_active_connections(active);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_signal_reaches_receivers() {
        let tracker = ConnectionTracker::new();
        let mut rx = tracker.drain_receiver();
        assert!(!*rx.borrow());

        tracker.begin_drain();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(tracker.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_gives_up_after_grace() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        assert!(!tracker.wait_idle(Duration::from_secs(1)).await);

        drop(guard);
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
    }
}
