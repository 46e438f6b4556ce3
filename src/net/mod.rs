//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs   (accept loop, connection ceiling)
//!     → connection.rs (lifecycle tracking, drain signal)
//!     → hyper connection with a header read deadline
//!     → http::server  (shield chain)
//! ```
//!
//! # Design Decisions
//! - A connection slot is taken before accepting, so a full gateway pushes
//!   back on the kernel queue instead of accepting and dropping
//! - Each connection is tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
