//! The request stage chain.
//!
//! # Data Flow
//! ```text
//! Request
//!     → resources.rs   (sample time + memory; observe only)
//!     → timeout.rs     (arm request deadline; single terminal response)
//!     → slow_client.rs (body must arrive within the read deadline)
//!     → concurrency.rs (per-key in-flight ceiling)
//!     → payload.rs     (size, depth and pattern checks)
//!     → sanitize.rs    (strip markup from the working copy)
//!     → downstream handler
//! ```
//!
//! Any stage may answer with a [`ShieldError`] instead of calling the next
//! one. Whatever happens, the concurrency slot and the resource sample are
//! released exactly once.

pub mod concurrency;
pub mod payload;
pub mod resources;
pub mod sanitize;
pub mod slow_client;
pub mod timeout;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::Request,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    Router,
};

use crate::config::ShieldConfig;
use crate::http::response::ShieldError;
use crate::observability::metrics;
use crate::observability::resources::{MemoryProbe, ProcessMemory, ResourceMonitor, ResourceThresholds};
use crate::security::{
    ClientKey, InFlightRegistry, InspectLimits, KeyExtractor, PatternSet, PayloadInspector, PeerAddress,
};

/// Shared state of the stage chain. Cheap to clone.
#[derive(Clone)]
pub struct Shield {
    inner: Arc<ShieldInner>,
}

struct ShieldInner {
    settings: ArcSwap<ShieldConfig>,
    in_flight: Arc<InFlightRegistry>,
    monitor: Arc<ResourceMonitor>,
    patterns: PatternSet,
    keys: Arc<dyn KeyExtractor>,
}

/// Builder for [`Shield`].
pub struct ShieldBuilder {
    config: ShieldConfig,
    keys: Arc<dyn KeyExtractor>,
    probe: Option<Arc<dyn MemoryProbe>>,
}

impl ShieldBuilder {
    /// Replace the default peer-address key extraction.
    pub fn key_extractor(mut self, keys: impl KeyExtractor) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    /// Replace the sysinfo-backed memory probe.
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn build(self) -> Shield {
        let probe: Arc<dyn MemoryProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(ProcessMemory::new()),
        };
        Shield {
            inner: Arc::new(ShieldInner {
                settings: ArcSwap::from_pointee(self.config),
                in_flight: Arc::new(InFlightRegistry::new()),
                monitor: Arc::new(ResourceMonitor::new(probe)),
                patterns: PatternSet::builtin(),
                keys: self.keys,
            }),
        }
    }
}

impl Shield {
    pub fn builder(config: ShieldConfig) -> ShieldBuilder {
        ShieldBuilder {
            config,
            keys: Arc::new(PeerAddress),
            probe: None,
        }
    }

    pub fn new(config: ShieldConfig) -> Self {
        Self::builder(config).build()
    }

    /// Current settings. Stages load them once per request.
    pub fn settings(&self) -> Arc<ShieldConfig> {
        self.inner.settings.load_full()
    }

    /// Swap in new settings; requests already in the chain keep the old ones.
    /// Open-request counts carry over.
    pub fn update(&self, config: ShieldConfig) {
        self.inner.settings.store(Arc::new(config));
        tracing::info!("Shield settings updated");
    }

    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.inner.in_flight
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.inner.monitor
    }

    pub fn client_key(&self, request: &Request<Body>, settings: &ShieldConfig) -> ClientKey {
        self.inner.keys.extract(request, settings)
    }

    pub fn inspector(&self, settings: &ShieldConfig) -> PayloadInspector {
        PayloadInspector::new(
            InspectLimits {
                max_array_items: settings.max_array_items,
                max_depth: settings.max_depth,
            },
            self.inner.patterns,
        )
    }

    pub fn thresholds(&self, settings: &ShieldConfig) -> ResourceThresholds {
        ResourceThresholds {
            slow_request: settings.slow_request_threshold(),
            high_memory_bytes: settings.high_memory_threshold_bytes,
        }
    }

    /// Wrap `router` with the full stage chain.
    ///
    /// Layers added later run first, so they are listed innermost first.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(from_fn_with_state(self.clone(), sanitize::sanitizer))
            .layer(from_fn_with_state(self.clone(), payload::payload_guard))
            .layer(from_fn_with_state(self.clone(), concurrency::concurrency_limiter))
            .layer(from_fn_with_state(self.clone(), slow_client::slow_client_guard))
            .layer(from_fn_with_state(self.clone(), timeout::timeout_guard))
            .layer(from_fn_with_state(self.clone(), resources::resource_monitor))
    }
}

/// Count a rejection and turn it into a response.
pub(crate) fn reject(err: ShieldError) -> Response {
    metrics::record_rejection(err.reason());
    err.into_response()
}
