//! Sync gate: holds resolution back until every kind finished its initial listing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::metrics;
use crate::resources::ResourceKind;

/// One-way `NotReady -> Ready` latch shared by the dispatchers and the resolver.
///
/// The gate never reverts: losing a watch after the initial sync leaves the
/// last known index in service.
#[derive(Debug, Clone, Default)]
pub struct SyncGate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    synced: [AtomicBool; 4],
    ready: AtomicBool,
}

impl SyncGate {
    /// Create a gate with no kind synced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `kind` completed its initial listing.
    ///
    /// Returns `true` only for the call that moved the gate to ready.
    pub fn mark_synced(&self, kind: ResourceKind) -> bool {
        self.inner.synced[kind.slot()].store(true, Ordering::SeqCst);
        debug!(%kind, "initial listing complete");

        let all_synced = ResourceKind::ALL.iter().all(|k| self.is_synced(*k));
        if !all_synced {
            return false;
        }

        let transitioned = self
            .inner
            .ready
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if transitioned {
            info!("all resource kinds synced, resolver is ready");
        }
        transitioned
    }

    /// Whether `kind` has reported its initial listing.
    pub fn is_synced(&self, kind: ResourceKind) -> bool {
        self.inner.synced[kind.slot()].load(Ordering::SeqCst)
    }

    /// Check if queries may be answered.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Kinds still waiting on their initial listing.
    pub fn pending(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|k| !self.is_synced(*k))
            .collect()
    }

    /// Emit readiness gauges.
    pub fn emit_metrics(&self) {
        for kind in ResourceKind::ALL {
            metrics::record_kind_synced(kind, self.is_synced(kind));
        }
        metrics::record_ready_state(self.is_ready());
    }
}
