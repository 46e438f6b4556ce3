//! Shutdown coordination.
//!
//! The trigger is latched: a task that subscribes after shutdown began
//! still observes it, and the first trigger's reason is kept for logging.

use tokio::sync::watch;

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    Requested,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::Requested => f.write_str("requested"),
        }
    }
}

/// Owner side of the shutdown latch. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<Option<ShutdownReason>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Begin shutdown. Only the first call's reason is recorded.
    pub fn trigger(&self) {
        self.trigger_with(ShutdownReason::Requested);
    }

    pub fn trigger_with(&self, reason: ShutdownReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of the latch.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been triggered. Also resolves if every
    /// `Shutdown` handle was dropped, since nothing can trigger it anymore.
    pub async fn recv(&mut self) -> ShutdownReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            Err(_) => ShutdownReason::Requested,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();

        shutdown.trigger_with(ShutdownReason::Signal("SIGTERM"));
        assert_eq!(a.recv().await, ShutdownReason::Signal("SIGTERM"));
        assert_eq!(b.recv().await, ShutdownReason::Signal("SIGTERM"));
    }

    #[tokio::test]
    async fn late_subscriber_sees_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut late = shutdown.subscribe();
        assert!(late.is_triggered());
        assert_eq!(late.recv().await, ShutdownReason::Requested);
    }

    #[test]
    fn first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(shutdown.trigger_with(ShutdownReason::Signal("SIGINT")));
        assert!(!shutdown.trigger_with(ShutdownReason::Signal("SIGTERM")));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Signal("SIGINT")));
    }

    #[tokio::test]
    async fn dropped_owner_releases_waiters() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        drop(shutdown);
        assert_eq!(signal.recv().await, ShutdownReason::Requested);
    }
}
