//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_key.rs (who is asking)
//!     → concurrency.rs (per-key in-flight ceiling)
//!     → payload.rs (structured view of body, query, params)
//!     → inspect.rs + patterns.rs (size, depth, suspicious patterns)
//!     → sanitize.rs (strip markup from every string)
//!     → Pass to downstream handler
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input
//! - Inspection and sanitizing are pure; the only shared mutable state here is
//!   the in-flight registry

pub mod client_key;
pub mod concurrency;
pub mod inspect;
pub mod patterns;
pub mod payload;
pub mod sanitize;

pub use client_key::{ClientKey, KeyExtractor, PeerAddress};
pub use concurrency::{InFlightPermit, InFlightRegistry, ReleaseHooks};
pub use inspect::{InspectError, InspectLimits, PayloadInspector};
pub use patterns::{PatternCategory, PatternRule, PatternSet};
pub use payload::{BodyKind, RequestPayload};
pub use sanitize::{sanitize_str, sanitize_value};
