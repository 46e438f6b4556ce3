//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Apply CLI overrides → Validate
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger_with
//!
//! Shutdown (shutdown.rs):
//!     Latch → accept loop stops → connections drain → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - A second signal during drain exits immediately

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownReason, ShutdownSignal};
pub use signals::{spawn_signal_handler, wait_for_signal};
pub use startup::{resolve_config, Overrides};
