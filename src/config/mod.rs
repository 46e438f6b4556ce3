//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → ShieldConfig shared via ArcSwap with every stage
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<ShieldConfig>
//!     → stages observe new settings on their next request
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener settings are read once at startup; only shield settings reload

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{GatewayConfig, ListenerConfig, ObservabilityConfig, ShieldConfig, UpstreamConfig};
pub use validation::{validate_config, ValidationError};
