//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the admission gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Admission-control and abuse-mitigation settings.
    pub shield: ShieldConfig,

    /// Upstream application the gateway forwards admitted requests to.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long to wait for open connections on shutdown, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            drain_timeout_ms: 10_000,
        }
    }
}

impl ListenerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Settings for the request stage chain.
///
/// Field names follow the option table the gateway documents; durations are
/// plain milliseconds so they read naturally in TOML.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShieldConfig {
    /// Timeout Guard deadline.
    pub request_timeout_ms: u64,

    /// Slow-Client Guard deadline (headers and body).
    pub header_timeout_ms: u64,

    /// Concurrency Limiter ceiling per client key.
    pub max_concurrent_per_key: usize,

    /// Largest list allowed anywhere in a payload.
    pub max_array_items: usize,

    /// Deepest nesting allowed anywhere in a payload.
    pub max_depth: usize,

    /// Hard cap on buffered body bytes.
    pub max_body_bytes: usize,

    /// Resource Monitor latency warning threshold.
    pub slow_request_threshold_ms: u64,

    /// Resource Monitor memory-delta warning threshold.
    pub high_memory_threshold_bytes: u64,

    /// Use the first `X-Forwarded-For` hop as the client key.
    pub trust_forwarded_for: bool,

    /// Run JSON response bodies through the sanitizer too.
    pub sanitize_responses: bool,

    /// Extra time the outer backstop timer allows past the request deadline.
    pub backstop_grace_ms: u64,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            header_timeout_ms: 10_000,
            max_concurrent_per_key: 10,
            max_array_items: 100,
            max_depth: 32,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            slow_request_threshold_ms: 5_000,
            high_memory_threshold_bytes: 50 * 1024 * 1024,
            trust_forwarded_for: false,
            sanitize_responses: false,
            backstop_grace_ms: 5_000,
        }
    }
}

impl ShieldConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_millis(self.header_timeout_ms)
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }

    /// Deadline of the redundant outer timer.
    pub fn backstop_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.saturating_add(self.backstop_grace_ms))
    }
}

/// Upstream application settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the application (e.g., "http://127.0.0.1:3000").
    /// When unset the gateway answers with its built-in echo handler.
    pub url: Option<String>,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
