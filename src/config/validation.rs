//! Configuration validation.
//!
//! Serde handles the syntax; this module checks value ranges and addresses.
//! Returns all validation errors, not just the first.

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    BadAddress { field: &'static str, value: String },

    #[error("upstream.url is invalid: {0}")]
    BadUpstream(String),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let shield = &config.shield;

    let non_zero: [(&'static str, u64); 8] = [
        ("shield.request_timeout_ms", shield.request_timeout_ms),
        ("shield.header_timeout_ms", shield.header_timeout_ms),
        ("shield.max_concurrent_per_key", shield.max_concurrent_per_key as u64),
        ("shield.max_array_items", shield.max_array_items as u64),
        ("shield.max_depth", shield.max_depth as u64),
        ("shield.max_body_bytes", shield.max_body_bytes as u64),
        ("shield.slow_request_threshold_ms", shield.slow_request_threshold_ms),
        ("listener.max_connections", config.listener.max_connections as u64),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BadAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::BadAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if let Some(raw) = &config.upstream.url {
        match Url::parse(raw) {
            Ok(url) if url.scheme() != "http" => {
                errors.push(ValidationError::BadUpstream(format!(
                    "unsupported scheme '{}'",
                    url.scheme()
                )));
            }
            Ok(url) if url.host_str().is_none() => {
                errors.push(ValidationError::BadUpstream("missing host".to_string()));
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::BadUpstream(e.to_string())),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
