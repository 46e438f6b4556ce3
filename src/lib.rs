//! HTTP admission control and abuse mitigation.
//!
//! Wrap any axum [`Router`](axum::Router) with [`Shield::apply`] to put the
//! full stage chain in front of it, or run [`GatewayServer`] to guard a
//! separate upstream application.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::{GatewayConfig, ShieldConfig};
pub use http::{GatewayServer, Shield, ShieldError};
pub use lifecycle::Shutdown;
