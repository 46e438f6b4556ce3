//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request enters the chain:
//!     → timeouts.rs (arm the request deadline, race it against downstream)
//!     → slow_client.rs (receive the full body within the read deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every request has a deadline
//! - A timed-out request gets exactly one response; the loser of the race
//!   between deadline and completion is a no-op
//! - Downstream work is abandoned on timeout, not cancelled

pub mod slow_client;
pub mod timeouts;
