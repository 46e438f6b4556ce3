//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! hyper connection (header read deadline)
//!     → server.rs     (request id, tracing, backstop timeout)
//!     → middleware/   (shield stage chain)
//!     → upstream.rs   (forward to the application, or echo)
//!     → response.rs   (rejections rendered as JSON)
//! ```

pub mod middleware;
pub mod response;
pub mod server;
pub mod upstream;

pub use middleware::{Shield, ShieldBuilder};
pub use response::ShieldError;
pub use server::GatewayServer;
pub use upstream::{Upstream, UpstreamError};
