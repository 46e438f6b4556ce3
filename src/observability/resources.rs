//! Per-request resource telemetry.
//!
//! # Responsibilities
//! - Record a start sample (time, process memory) for each request
//! - On completion compute elapsed time and memory delta
//! - Warn when either crosses its threshold
//!
//! # Design Decisions
//! - Observational only: never rejects
//! - Samples live in a DashMap keyed by a fresh UUID and are removed by a
//!   guard, so a cancelled request cannot leak its sample
//! - Memory comes from a [`MemoryProbe`] so tests can script it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::Instant;
use uuid::Uuid;

use crate::observability::metrics;

/// Source of the process's current memory footprint, in bytes.
pub trait MemoryProbe: Send + Sync + 'static {
    fn resident_bytes(&self) -> u64;
}

/// How often the background sampler refreshes the process's memory.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Resident set size of the current process, via sysinfo.
///
/// A background thread refreshes the figure on an interval; reads are a
/// single atomic load, so requests never wait on `/proc`. The thread exits
/// once the probe is dropped.
pub struct ProcessMemory {
    resident: Arc<AtomicU64>,
}

struct Sampler {
    pid: Pid,
    system: System,
}

impl Sampler {
    fn read(&mut self) -> u64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self::with_interval(SAMPLE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        let resident = Arc::new(AtomicU64::new(0));
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!(error = e, "Could not resolve current pid, memory telemetry disabled");
                return Self { resident };
            }
        };

        let mut sampler = Sampler {
            pid,
            system: System::new(),
        };
        resident.store(sampler.read(), Ordering::Relaxed);

        let slot = Arc::downgrade(&resident);
        let spawned = std::thread::Builder::new()
            .name("memory-sampler".to_string())
            .spawn(move || loop {
                std::thread::sleep(interval);
                let Some(resident) = slot.upgrade() else {
                    break;
                };
                resident.store(sampler.read(), Ordering::Relaxed);
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Could not start memory sampler, memory readings stay fixed");
        }

        Self { resident }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemory {
    fn resident_bytes(&self) -> u64 {
        self.resident.load(Ordering::Relaxed)
    }
}

/// Start-of-request snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSample {
    pub started: Instant,
    pub start_memory: u64,
}

/// What a finished request cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceReport {
    pub elapsed: Duration,
    pub memory_delta: i64,
}

/// Warning thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceThresholds {
    pub slow_request: Duration,
    pub high_memory_bytes: u64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            slow_request: Duration::from_secs(5),
            high_memory_bytes: 50 * 1024 * 1024,
        }
    }
}

/// A threshold crossing worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceWarning {
    SlowRequest { elapsed: Duration },
    HighMemory { delta_bytes: i64 },
}

impl ResourceWarning {
    pub fn metric(&self) -> &'static str {
        match self {
            ResourceWarning::SlowRequest { .. } => "duration",
            ResourceWarning::HighMemory { .. } => "memory",
        }
    }
}

impl ResourceReport {
    pub fn warnings(&self, thresholds: ResourceThresholds) -> Vec<ResourceWarning> {
        let mut warnings = Vec::new();
        if self.elapsed > thresholds.slow_request {
            warnings.push(ResourceWarning::SlowRequest {
                elapsed: self.elapsed,
            });
        }
        if self.memory_delta > i64::try_from(thresholds.high_memory_bytes).unwrap_or(i64::MAX) {
            warnings.push(ResourceWarning::HighMemory {
                delta_bytes: self.memory_delta,
            });
        }
        warnings
    }
}

/// Owns the live samples.
pub struct ResourceMonitor {
    samples: DashMap<Uuid, ResourceSample>,
    probe: Arc<dyn MemoryProbe>,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            samples: DashMap::new(),
            probe,
        }
    }

    /// Record a sample under a fresh id.
    pub fn begin(self: &Arc<Self>) -> SampleGuard {
        let id = Uuid::new_v4();
        self.samples.insert(
            id,
            ResourceSample {
                started: Instant::now(),
                start_memory: self.probe.resident_bytes(),
            },
        );
        SampleGuard {
            monitor: Arc::clone(self),
            id,
            finished: false,
        }
    }

    /// Samples currently outstanding.
    pub fn live_samples(&self) -> usize {
        self.samples.len()
    }
}

/// Handle to one outstanding sample; dropping it discards the sample.
pub struct SampleGuard {
    monitor: Arc<ResourceMonitor>,
    id: Uuid,
    finished: bool,
}

impl SampleGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Consume the sample and compute the request's cost.
    pub fn finish(mut self) -> Option<ResourceReport> {
        self.finished = true;
        let (_, sample) = self.monitor.samples.remove(&self.id)?;
        let end_memory = self.monitor.probe.resident_bytes();
        Some(ResourceReport {
            elapsed: sample.started.elapsed(),
            memory_delta: end_memory as i64 - sample.start_memory as i64,
        })
    }
}

impl Drop for SampleGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.monitor.samples.remove(&self.id);
        }
    }
}

/// Log and count each warning.
pub fn emit_warnings(method: &str, path: &str, warnings: &[ResourceWarning], thresholds: ResourceThresholds) {
    for warning in warnings {
        metrics::record_resource_warning(warning.metric());
        match warning {
            ResourceWarning::SlowRequest { elapsed } => tracing::warn!(
                method = %method,
                path = %path,
                metric = warning.metric(),
                value_ms = elapsed.as_millis() as u64,
                threshold_ms = thresholds.slow_request.as_millis() as u64,
                "Slow request"
            ),
            ResourceWarning::HighMemory { delta_bytes } => tracing::warn!(
                method = %method,
                path = %path,
                metric = warning.metric(),
                value_bytes = *delta_bytes,
                threshold_bytes = thresholds.high_memory_bytes,
                "High memory usage during request"
            ),
        }
    }
}
