//! Resource store capability: create, list and watch objects of one kind.
//!
//! The watch dispatchers only see [`ResourceStore`], so the cluster transport
//! is injectable. [`InMemoryStore`] is a complete implementation used by the
//! tests and by the binary when it serves a static cluster seed.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::error::{DnsError, StoreError};
use crate::resources::{ClusterObject, Gateway, HttpRoute, Ingress, ObjectRef, Resource, Service};

/// Buffered live events per watcher before it is reported as lagging.
const EVENT_BUFFER: usize = 1024;

/// Lifecycle event delivered by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<K> {
    /// Object appeared (including initial listing replay).
    Added(K),
    /// Object changed.
    Updated(K),
    /// Object removed; carries its last known state.
    Deleted(K),
    /// The initial listing replay is complete; live events follow.
    Synced,
}

/// Stream of watch events. An `Err` item means the watch broke and must be
/// re-opened.
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, StoreError>>;

/// Per-kind watch/cache abstraction.
#[async_trait]
pub trait ResourceStore<K: Resource>: Send + Sync {
    /// Create an object. Fails if one with the same name exists.
    async fn create(&self, object: K) -> Result<K, StoreError>;

    /// Current objects.
    async fn list(&self) -> Result<Vec<K>, StoreError>;

    /// Open a watch: replay of current objects as `Added`, then `Synced`,
    /// then live events.
    async fn watch(&self) -> Result<WatchStream<K>, StoreError>;

    /// Whether an initial listing has completed.
    fn has_synced(&self) -> bool;
}

struct StoreState<K> {
    objects: BTreeMap<ObjectRef, K>,
    events: broadcast::Sender<WatchEvent<K>>,
}

/// In-memory resource store.
pub struct InMemoryStore<K: Resource> {
    state: Arc<Mutex<StoreState<K>>>,
    synced: Arc<AtomicBool>,
}

impl<K: Resource> Clone for InMemoryStore<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            synced: Arc::clone(&self.synced),
        }
    }
}

impl<K: Resource> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> InMemoryStore<K> {
    /// Empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(Mutex::new(StoreState {
                objects: BTreeMap::new(),
                events,
            })),
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace an existing object.
    pub fn update(&self, object: K) -> Result<K, StoreError> {
        let object_ref = object.object_ref();
        let mut state = self.state.lock();
        if !state.objects.contains_key(&object_ref) {
            return Err(StoreError::NotFound(object_ref.to_string()));
        }
        state.objects.insert(object_ref, object.clone());
        // No receivers is fine: nobody is watching yet.
        let _ = state.events.send(WatchEvent::Updated(object.clone()));
        Ok(object)
    }

    /// Create or replace an object.
    pub fn apply(&self, object: K) -> K {
        let object_ref = object.object_ref();
        let mut state = self.state.lock();
        let event = match state.objects.insert(object_ref, object.clone()) {
            Some(_) => WatchEvent::Updated(object.clone()),
            None => WatchEvent::Added(object.clone()),
        };
        let _ = state.events.send(event);
        object
    }

    /// Delete an object by namespace and name.
    pub fn delete(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let object_ref = ObjectRef::new(K::KIND, namespace, name);
        let mut state = self.state.lock();
        let removed = state
            .objects
            .remove(&object_ref)
            .ok_or_else(|| StoreError::NotFound(object_ref.to_string()))?;
        let _ = state.events.send(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    /// End every open watch stream, as a dropped connection would. Objects
    /// are kept and new watches work normally.
    pub fn disconnect_watchers(&self) {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let mut state = self.state.lock();
        state.events = events;
        debug!(kind = %K::KIND, "disconnected watchers");
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.state.lock().objects.is_empty()
    }
}

#[async_trait]
impl<K: Resource> ResourceStore<K> for InMemoryStore<K> {
    async fn create(&self, object: K) -> Result<K, StoreError> {
        let object_ref = object.object_ref();
        let mut state = self.state.lock();
        if state.objects.contains_key(&object_ref) {
            return Err(StoreError::AlreadyExists(object_ref.to_string()));
        }
        state.objects.insert(object_ref, object.clone());
        let _ = state.events.send(WatchEvent::Added(object.clone()));
        Ok(object)
    }

    async fn list(&self) -> Result<Vec<K>, StoreError> {
        Ok(self.state.lock().objects.values().cloned().collect())
    }

    async fn watch(&self) -> Result<WatchStream<K>, StoreError> {
        // Snapshot and subscribe under one lock so no event is lost or doubled.
        let (snapshot, rx) = {
            let state = self.state.lock();
            let snapshot: Vec<K> = state.objects.values().cloned().collect();
            (snapshot, state.events.subscribe())
        };

        let synced = Arc::clone(&self.synced);
        let replay = stream::iter(snapshot.into_iter().map(|o| Ok(WatchEvent::Added(o))))
            .chain(stream::once(async move {
                synced.store(true, Ordering::Release);
                Ok(WatchEvent::Synced)
            }));

        let live = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(RecvError::Lagged(n)) => Some((Err(StoreError::Lagged(n)), rx)),
                Err(RecvError::Closed) => None,
            }
        });

        Ok(replay.chain(live).boxed())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// The four per-kind stores the server watches.
#[derive(Clone)]
pub struct ClusterStores {
    /// Ingress store.
    pub ingresses: Arc<dyn ResourceStore<Ingress>>,
    /// Service store.
    pub services: Arc<dyn ResourceStore<Service>>,
    /// Gateway store.
    pub gateways: Arc<dyn ResourceStore<Gateway>>,
    /// HTTPRoute store.
    pub http_routes: Arc<dyn ResourceStore<HttpRoute>>,
}

impl ClusterStores {
    /// Whether every store has completed an initial listing.
    pub fn has_synced(&self) -> bool {
        self.ingresses.has_synced()
            && self.services.has_synced()
            && self.gateways.has_synced()
            && self.http_routes.has_synced()
    }
}

/// In-memory stores for all four kinds.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    /// Ingress store.
    pub ingresses: InMemoryStore<Ingress>,
    /// Service store.
    pub services: InMemoryStore<Service>,
    /// Gateway store.
    pub gateways: InMemoryStore<Gateway>,
    /// HTTPRoute store.
    pub http_routes: InMemoryStore<HttpRoute>,
}

impl InMemoryCluster {
    /// Empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an object in the store of its kind.
    pub fn apply(&self, object: ClusterObject) {
        match object {
            ClusterObject::Ingress(o) => {
                self.ingresses.apply(o);
            }
            ClusterObject::Service(o) => {
                self.services.apply(o);
            }
            ClusterObject::Gateway(o) => {
                self.gateways.apply(o);
            }
            ClusterObject::HttpRoute(o) => {
                self.http_routes.apply(o);
            }
        }
    }

    /// Type-erased handles for the watch dispatchers.
    pub fn stores(&self) -> ClusterStores {
        ClusterStores {
            ingresses: Arc::new(self.ingresses.clone()),
            services: Arc::new(self.services.clone()),
            gateways: Arc::new(self.gateways.clone()),
            http_routes: Arc::new(self.http_routes.clone()),
        }
    }
}

/// Seed document: either a bare array of objects or a Kubernetes `List`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SeedDocument {
    Items(Vec<ClusterObject>),
    List { items: Vec<ClusterObject> },
}

/// Parse cluster objects from seed JSON.
pub fn parse_seed(json: &str) -> Result<Vec<ClusterObject>, DnsError> {
    let doc: SeedDocument = serde_json::from_str(json)?;
    Ok(match doc {
        SeedDocument::Items(items) | SeedDocument::List { items } => items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{object_meta, ResourceKind};

    fn svc(ns: &str, name: &str) -> Service {
        Service {
            metadata: object_meta(ns, name),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = InMemoryStore::new();
        store.create(svc("ns1", "svc1")).await.unwrap();
        let err = store.create(svc("ns1", "svc1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_replays_then_streams() {
        let store = InMemoryStore::new();
        store.create(svc("ns1", "svc1")).await.unwrap();
        assert!(!store.has_synced());

        let mut stream = store.watch().await.unwrap();
        assert_eq!(
            stream.next().await,
            Some(Ok(WatchEvent::Added(svc("ns1", "svc1"))))
        );
        assert_eq!(stream.next().await, Some(Ok(WatchEvent::Synced)));
        assert!(store.has_synced());

        store.create(svc("ns1", "svc2")).await.unwrap();
        store.update(svc("ns1", "svc2")).unwrap();
        store.delete("ns1", "svc1").unwrap();

        assert_eq!(
            stream.next().await,
            Some(Ok(WatchEvent::Added(svc("ns1", "svc2"))))
        );
        assert_eq!(
            stream.next().await,
            Some(Ok(WatchEvent::Updated(svc("ns1", "svc2"))))
        );
        assert_eq!(
            stream.next().await,
            Some(Ok(WatchEvent::Deleted(svc("ns1", "svc1"))))
        );
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let store: InMemoryStore<Service> = InMemoryStore::new();
        let mut stream = store.watch().await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(WatchEvent::Synced)));

        store.disconnect_watchers();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_fail() {
        let store: InMemoryStore<Service> = InMemoryStore::new();
        assert!(matches!(
            store.update(svc("ns1", "svc1")),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("ns1", "svc1"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_seed_accepts_list_and_array() {
        let list = r#"{"apiVersion": "v1", "kind": "List", "items": [
            {"kind": "Service", "metadata": {"name": "svc1", "namespace": "ns1"}},
            {"kind": "Gateway", "metadata": {"name": "gw-1", "namespace": "ns1"}}
        ]}"#;
        let objects = parse_seed(list).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].kind(), ResourceKind::Gateway);

        let array = r#"[{"kind": "Ingress", "metadata": {"name": "ing1", "namespace": "ns1"}}]"#;
        assert_eq!(parse_seed(array).unwrap().len(), 1);

        assert!(matches!(parse_seed("{"), Err(DnsError::Seed(_))));
    }

    #[test]
    fn test_cluster_apply_routes_by_kind() {
        let cluster = InMemoryCluster::new();
        cluster.apply(ClusterObject::Service(svc("ns1", "svc1")));
        cluster.apply(ClusterObject::Service(svc("ns1", "svc1")));
        assert_eq!(cluster.services.len(), 1);
        assert!(cluster.ingresses.is_empty());
    }
}
