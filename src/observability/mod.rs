//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every stage produces:
//!     → logging.rs   (structured tracing events, pretty or JSON)
//!     → metrics.rs   (counters, gauges, histograms)
//!
//! The Resource Monitor stage feeds:
//!     → resources.rs (per-request time and memory samples)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never interpolated strings, so JSON logs stay queryable
//! - Request id comes from tower-http and shows up on the request span
//! - Metrics are cheap (atomic increments) and inert until a recorder exists

pub mod logging;
pub mod metrics;
pub mod resources;
