//! Watch dispatchers: one task per resource kind feeding the cluster index.

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DnsError, StoreError};
use crate::gate::SyncGate;
use crate::index::ClusterIndex;
use crate::metrics::{self, ReconnectReason, WatchEventType};
use crate::resources::{ObjectRef, Resource};
use crate::store::{ClusterStores, ResourceStore, WatchEvent};

const MAX_BACKOFF_SECS: u64 = 30;

/// Runs the per-kind watches that keep the index current.
pub struct WatchHandler {
    stores: ClusterStores,
    index: ClusterIndex,
    gate: SyncGate,
}

impl WatchHandler {
    /// Create a new watch handler.
    pub fn new(stores: ClusterStores, index: ClusterIndex, gate: SyncGate) -> Self {
        Self {
            stores,
            index,
            gate,
        }
    }

    /// Watch all four kinds until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DnsError> {
        let ingresses = tokio::spawn(watch_kind(
            self.stores.ingresses.clone(),
            self.index.clone(),
            self.gate.clone(),
            cancel.clone(),
        ));
        let services = tokio::spawn(watch_kind(
            self.stores.services.clone(),
            self.index.clone(),
            self.gate.clone(),
            cancel.clone(),
        ));
        let gateways = tokio::spawn(watch_kind(
            self.stores.gateways.clone(),
            self.index.clone(),
            self.gate.clone(),
            cancel.clone(),
        ));
        let http_routes = tokio::spawn(watch_kind(
            self.stores.http_routes.clone(),
            self.index.clone(),
            self.gate.clone(),
            cancel.clone(),
        ));

        // Wait for all of them to complete (on shutdown)
        let results = tokio::join!(ingresses, services, gateways, http_routes);
        for result in [results.0, results.1, results.2, results.3] {
            if let Err(e) = result {
                error!("Watch task panicked: {}", e);
            }
        }

        Ok(())
    }
}

/// Sleep unless cancelled first. Returns true on cancellation.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Keep one kind's index current, re-opening the watch whenever it breaks.
///
/// The index is left untouched while disconnected; the re-list that follows a
/// reconnect replays every live object and prunes the ones that disappeared.
pub async fn watch_kind<K: Resource>(
    store: Arc<dyn ResourceStore<K>>,
    index: ClusterIndex,
    gate: SyncGate,
    cancel: CancellationToken,
) {
    let kind = K::KIND;
    let mut backoff_secs = 1u64;
    let mut first_connect = true;

    loop {
        if cancel.is_cancelled() {
            info!(%kind, "Watch shutting down");
            return;
        }

        info!(%kind, "Starting watch");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = store.watch() => opened,
        };

        let mut stream = match opened {
            Ok(s) => {
                backoff_secs = 1;
                if first_connect {
                    metrics::record_watch_reconnect(kind, ReconnectReason::InitialConnect);
                    first_connect = false;
                }
                s
            }
            Err(e) => {
                error!(%kind, "Failed to open watch: {}", e);
                metrics::record_watch_reconnect(kind, ReconnectReason::Error);
                if sleep_or_cancel(Duration::from_secs(backoff_secs), &cancel).await {
                    return;
                }
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }
        };

        let mut replay = Some(HashSet::new());

        // Process events until error or shutdown
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(%kind, "Watch received shutdown signal");
                    return;
                }

                result = stream.next() => {
                    match result {
                        Some(Ok(event)) => {
                            handle_event(&index, &gate, event, &mut replay);
                        }
                        Some(Err(StoreError::Lagged(dropped))) => {
                            warn!(%kind, dropped, "Watch lagged, re-listing");
                            metrics::record_watch_reconnect(kind, ReconnectReason::Lagged);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(%kind, "Watch error: {}", e);
                            metrics::record_watch_reconnect(kind, ReconnectReason::Error);
                            break;
                        }
                        None => {
                            info!(%kind, "Watch stream ended");
                            metrics::record_watch_reconnect(kind, ReconnectReason::StreamEnded);
                            break;
                        }
                    }
                }
            }
        }

        // Brief delay before reconnecting
        if sleep_or_cancel(Duration::from_secs(1), &cancel).await {
            return;
        }
    }
}

/// Apply one watch event. `replay` collects the objects seen before `Synced`
/// and is consumed when the initial listing completes.
fn handle_event<K: Resource>(
    index: &ClusterIndex,
    gate: &SyncGate,
    event: WatchEvent<K>,
    replay: &mut Option<HashSet<ObjectRef>>,
) {
    let kind = K::KIND;
    match event {
        WatchEvent::Added(object) => {
            let event_type = match replay.as_mut() {
                Some(seen) => {
                    seen.insert(object.object_ref());
                    WatchEventType::InitialListing
                }
                None => WatchEventType::Added,
            };
            index.upsert(&object.into_object());
            metrics::record_watch_event(kind, event_type);
        }
        WatchEvent::Updated(object) => {
            if let Some(seen) = replay.as_mut() {
                seen.insert(object.object_ref());
            }
            index.upsert(&object.into_object());
            metrics::record_watch_event(kind, WatchEventType::Updated);
        }
        WatchEvent::Deleted(object) => {
            let object_ref = object.object_ref();
            if let Some(seen) = replay.as_mut() {
                seen.remove(&object_ref);
            }
            index.remove(&object_ref);
            metrics::record_watch_event(kind, WatchEventType::Deleted);
        }
        WatchEvent::Synced => {
            if let Some(seen) = replay.take() {
                let pruned = index.retain(kind, &seen);
                debug!(%kind, objects = seen.len(), pruned, "initial listing complete");
            }
            gate.mark_synced(kind);
            metrics::record_watch_event(kind, WatchEventType::Synced);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{build_ingress, Ingress, ResourceKind};

    fn make_ingress(name: &str, host: &str) -> Ingress {
        build_ingress("ns1", name, &[host], &["192.0.0.1"])
    }

    #[test]
    fn test_synced_marks_gate_for_kind() {
        let index = ClusterIndex::new();
        let gate = SyncGate::new();
        let mut replay = Some(HashSet::new());

        handle_event(
            &index,
            &gate,
            WatchEvent::Added(make_ingress("ing1", "a.example.org")),
            &mut replay,
        );
        assert!(!gate.is_synced(ResourceKind::Ingress));

        handle_event::<Ingress>(&index, &gate, WatchEvent::Synced, &mut replay);
        assert!(gate.is_synced(ResourceKind::Ingress));
        assert!(replay.is_none());
        assert_eq!(index.record_count(ResourceKind::Ingress), 1);
    }

    #[test]
    fn test_relist_prunes_objects_deleted_while_disconnected() {
        let index = ClusterIndex::new();
        let gate = SyncGate::new();

        index.upsert(&make_ingress("gone", "gone.example.org").into_object());
        index.upsert(&make_ingress("kept", "kept.example.org").into_object());

        let mut replay = Some(HashSet::new());
        handle_event(
            &index,
            &gate,
            WatchEvent::Added(make_ingress("kept", "kept.example.org")),
            &mut replay,
        );
        handle_event::<Ingress>(&index, &gate, WatchEvent::Synced, &mut replay);

        assert!(index
            .lookup(ResourceKind::Ingress, &["gone.example.org"])
            .is_empty());
        assert_eq!(
            index.lookup(ResourceKind::Ingress, &["kept.example.org"]).len(),
            1
        );
    }

    #[test]
    fn test_live_delete_removes_object() {
        let index = ClusterIndex::new();
        let gate = SyncGate::new();
        let mut replay = None;

        let ing = make_ingress("ing1", "a.example.org");
        handle_event(&index, &gate, WatchEvent::Added(ing.clone()), &mut replay);
        handle_event(&index, &gate, WatchEvent::Deleted(ing), &mut replay);

        assert_eq!(index.record_count(ResourceKind::Ingress), 0);
    }
}
