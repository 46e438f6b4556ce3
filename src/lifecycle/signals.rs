//! OS signal handling.
//!
//! SIGINT (Ctrl-C) and SIGTERM start a graceful shutdown. A second signal
//! while draining exits the process at once.

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::{Shutdown, ShutdownReason};

/// Exit status for a forced exit after a repeated signal.
const FORCED_EXIT_CODE: i32 = 130;

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Resolve on the next SIGINT or SIGTERM. Returns the signal's name.
pub async fn wait_for_signal() -> &'static str {
    tokio::select! {
        _ = ctrl_c() => "SIGINT",
        _ = terminate() => "SIGTERM",
    }
}

/// Trigger `shutdown` on the first signal; exit on the second.
pub fn spawn_signal_handler(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal, "Shutdown signal received, draining");
        shutdown.trigger_with(ShutdownReason::Signal(signal));

        let signal = wait_for_signal().await;
        tracing::warn!(signal, "Second signal received, exiting immediately");
        std::process::exit(FORCED_EXIT_CODE);
    })
}
