//! Startup configuration resolution.
//!
//! The effective config is the file (or the defaults when no file is given)
//! with command-line overrides applied on top, validated as a whole.

use std::path::Path;

use crate::config::{load_config, validate_config, ConfigError, GatewayConfig};

/// Values given on the command line that replace file settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub upstream: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.upstream.url = Some(upstream.clone());
        }
    }
}

/// Load `path` (if any), apply `overrides`, and validate the result.
pub fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
