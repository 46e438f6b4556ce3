//! Per-client in-flight request accounting.
//!
//! # Responsibilities
//! - Admit or refuse a request based on how many requests its key has open
//! - Release each admitted slot exactly once, whatever the outcome
//! - Drop keys whose count reaches zero
//!
//! # Design Decisions
//! - Check-and-increment runs under the DashMap shard lock for the key
//! - A slot is represented by an [`InFlightPermit`]; releasing is idempotent and
//!   also happens when the last clone of the permit drops
//! - The timeout guard can release a permit early through [`ReleaseHooks`]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::observability::metrics;
use crate::security::client_key::ClientKey;

/// Concurrency-safe map of client key → open request count.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    counts: DashMap<ClientKey, usize>,
    total: AtomicUsize,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take a slot for `key`. Returns `None` if the key already holds
    /// `max` slots; the counter is left untouched in that case.
    pub fn try_acquire(self: &Arc<Self>, key: &ClientKey, max: usize) -> Option<InFlightPermit> {
        match self.counts.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() >= max {
                    return None;
                }
                *entry.get_mut() += 1;
            }
            Entry::Vacant(entry) => {
                if max == 0 {
                    return None;
                }
                entry.insert(1);
            }
        }

        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_in_flight(total);

        Some(InFlightPermit {
            inner: Arc::new(PermitInner {
                registry: Arc::clone(self),
                key: key.clone(),
                released: AtomicBool::new(false),
            }),
        })
    }

    /// Current open count for `key` (0 when absent).
    pub fn count(&self, key: &ClientKey) -> usize {
        self.counts.get(key).map(|c| *c).unwrap_or(0)
    }

    /// Number of keys with at least one open request.
    pub fn tracked_keys(&self) -> usize {
        self.counts.len()
    }

    /// Open requests across all keys.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn release(&self, key: &ClientKey) {
        if let Entry::Occupied(mut entry) = self.counts.entry(key.clone()) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
            let total = self.total.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            metrics::record_in_flight(total);
        } else {
            tracing::error!(client = %key, "Released a slot for a key with no open requests");
        }
    }
}

#[derive(Debug)]
struct PermitInner {
    registry: Arc<InFlightRegistry>,
    key: ClientKey,
    released: AtomicBool,
}

impl PermitInner {
    fn release(&self) -> bool {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.registry.release(&self.key);
            true
        } else {
            false
        }
    }
}

impl Drop for PermitInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// One admitted request slot.
///
/// Clones share the slot. The slot is returned by the first call to
/// [`release`](Self::release) or when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct InFlightPermit {
    inner: Arc<PermitInner>,
}

impl InFlightPermit {
    /// Return the slot. Returns `false` if it was already returned.
    pub fn release(&self) -> bool {
        self.inner.release()
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn key(&self) -> &ClientKey {
        &self.inner.key
    }
}

/// Permits registered by inner stages so an outer stage can release them
/// when it abandons the request.
#[derive(Debug, Clone, Default)]
pub struct ReleaseHooks {
    permits: Arc<Mutex<Vec<InFlightPermit>>>,
}

impl ReleaseHooks {
    pub fn attach(&self, permit: InFlightPermit) {
        self.permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(permit);
    }

    /// Release every attached permit. Returns how many were still held.
    pub fn release_all(&self) -> usize {
        let permits: Vec<_> = self
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        permits.iter().filter(|p| p.release()).count()
    }

    /// Guard that releases every attached permit when dropped, covering
    /// requests abandoned mid-flight (e.g. the client disconnected).
    pub fn release_on_drop(&self) -> ReleaseOnDrop {
        ReleaseOnDrop(self.clone())
    }
}

/// See [`ReleaseHooks::release_on_drop`].
#[derive(Debug)]
pub struct ReleaseOnDrop(ReleaseHooks);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let released = self.0.release_all();
        if released > 0 {
            tracing::debug!(released, "Released slots of an abandoned request");
        }
    }
}
