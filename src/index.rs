//! In-memory composite index of cluster objects, kept current from watch events.
//!
//! Each resource kind owns a disjoint [`KindIndex`] behind its own lock, so the
//! four watch dispatchers never contend with each other and a reader only ever
//! sees a kind's map before or after a whole diff. There is no snapshot across
//! kinds: a query may observe a newer Service view than Ingress view.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::indexer;
use crate::metrics;
use crate::resources::{ClusterObject, ObjectRef, ResourceKind};

/// One object as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRecord {
    /// Object identity.
    pub object: ObjectRef,
    /// Keys this object is currently listed under. Never empty.
    pub keys: BTreeSet<String>,
    /// Addresses from the object status, in status order.
    pub addresses: Vec<String>,
    /// Gateway join keys for HTTPRoutes; empty for other kinds.
    pub parents: Vec<String>,
}

/// Index of a single resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindIndex {
    /// key -> objects contributing that key. No entry is ever an empty set.
    keys: HashMap<String, BTreeSet<ObjectRef>>,
    /// object -> its stored record, used to diff updates and deletes.
    records: HashMap<ObjectRef, IndexedRecord>,
}

impl KindIndex {
    /// Insert or replace a record. Returns false when nothing changed.
    fn upsert(&mut self, record: IndexedRecord) -> bool {
        let stale: Vec<String> = match self.records.get(&record.object) {
            Some(old) if *old == record => return false,
            Some(old) => old.keys.difference(&record.keys).cloned().collect(),
            None => Vec::new(),
        };

        for key in &stale {
            self.unlink(key, &record.object);
        }
        for key in &record.keys {
            self.keys
                .entry(key.clone())
                .or_default()
                .insert(record.object.clone());
        }
        self.records.insert(record.object.clone(), record);
        true
    }

    /// Remove an object from every key it occupies.
    fn remove(&mut self, object: &ObjectRef) -> Option<IndexedRecord> {
        let record = self.records.remove(object)?;
        for key in &record.keys {
            self.unlink(key, object);
        }
        Some(record)
    }

    fn unlink(&mut self, key: &str, object: &ObjectRef) {
        if let Some(members) = self.keys.get_mut(key) {
            members.remove(object);
            if members.is_empty() {
                self.keys.remove(key);
            }
        }
    }

    /// Records contributing `key`, in object order.
    pub fn contributors<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a IndexedRecord> + 'a {
        self.keys
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|object| self.records.get(object))
    }

    /// Stored record for an object.
    pub fn record(&self, object: &ObjectRef) -> Option<&IndexedRecord> {
        self.records.get(object)
    }

    /// Objects listed under `key`.
    pub fn members(&self, key: &str) -> Option<&BTreeSet<ObjectRef>> {
        self.keys.get(key)
    }

    /// Whether any object is listed under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no object of this kind is indexed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

/// Thread-safe index over all watched kinds.
#[derive(Debug, Clone, Default)]
pub struct ClusterIndex {
    inner: Arc<ClusterIndexInner>,
}

#[derive(Debug, Default)]
struct ClusterIndexInner {
    /// One map per kind, addressed by `ResourceKind::slot`.
    kinds: [RwLock<KindIndex>; 4],

    /// Serial number for SOA (incremented on every effective change).
    serial: AtomicU32,
}

impl ClusterIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn kind(&self, kind: ResourceKind) -> &RwLock<KindIndex> {
        &self.inner.kinds[kind.slot()]
    }

    fn bump_serial(&self) {
        self.inner.serial.fetch_add(1, Ordering::Relaxed);
    }

    /// Apply an Added or Updated object. An object that produces no keys is
    /// dropped from the index. Returns whether the index changed.
    pub fn upsert(&self, object: &ClusterObject) -> bool {
        let object_ref = object.object_ref();
        let entry = indexer::index(object);

        if entry.keys.is_empty() {
            debug!(object = %object_ref, "object has no index keys");
            return self.remove(&object_ref);
        }

        let record = IndexedRecord {
            object: object_ref,
            keys: entry.keys,
            addresses: entry.addresses,
            parents: entry.parents,
        };

        let kind = record.object.kind;
        debug!(
            object = %record.object,
            keys = ?record.keys,
            addresses = ?record.addresses,
            "upserting object"
        );
        let changed = self.kind(kind).write().upsert(record);
        if changed {
            self.bump_serial();
        }
        changed
    }

    /// Apply a Deleted object. Returns whether the object was indexed.
    pub fn remove(&self, object: &ObjectRef) -> bool {
        let removed = self.kind(object.kind).write().remove(object);
        match removed {
            Some(record) => {
                debug!(object = %object, keys = ?record.keys, "removed object");
                self.bump_serial();
                true
            }
            None => false,
        }
    }

    /// Drop every record of `kind` that is not in `live`. Used after a
    /// re-list to forget objects deleted while the watch was down.
    pub fn retain(&self, kind: ResourceKind, live: &HashSet<ObjectRef>) -> usize {
        let mut guard = self.kind(kind).write();
        let gone: Vec<ObjectRef> = guard
            .records
            .keys()
            .filter(|object| !live.contains(*object))
            .cloned()
            .collect();

        for object in &gone {
            guard.remove(object);
        }
        drop(guard);

        if !gone.is_empty() {
            debug!(%kind, removed = gone.len(), "pruned objects missing from re-list");
            self.bump_serial();
        }
        gone.len()
    }

    /// Records of `kind` contributing any of `keys`. Each record appears once
    /// even if it matches several keys.
    pub fn lookup(&self, kind: ResourceKind, keys: &[&str]) -> Vec<IndexedRecord> {
        let guard = self.kind(kind).read();
        let mut found: BTreeMap<&ObjectRef, &IndexedRecord> = BTreeMap::new();
        for key in keys {
            for record in guard.contributors(key) {
                found.insert(&record.object, record);
            }
        }
        found.into_values().cloned().collect()
    }

    /// Addresses of the Gateways behind the given join keys, in join-key
    /// order. Unknown Gateways contribute nothing.
    pub fn join_addresses(&self, join_keys: &[String]) -> Vec<String> {
        let guard = self.kind(ResourceKind::Gateway).read();
        join_keys
            .iter()
            .flat_map(|key| guard.contributors(key))
            .flat_map(|record| record.addresses.iter().cloned())
            .collect()
    }

    /// Copy of one kind's index.
    pub fn snapshot(&self, kind: ResourceKind) -> KindIndex {
        self.kind(kind).read().clone()
    }

    /// Number of records stored for a kind.
    pub fn record_count(&self, kind: ResourceKind) -> usize {
        self.kind(kind).read().len()
    }

    /// Number of distinct keys stored for a kind.
    pub fn key_count(&self, kind: ResourceKind) -> usize {
        self.kind(kind).read().key_count()
    }

    /// Get current SOA serial.
    pub fn serial(&self) -> u32 {
        self.inner.serial.load(Ordering::Relaxed)
    }

    /// Emit current index metrics.
    pub fn emit_metrics(&self) {
        for kind in ResourceKind::ALL {
            let guard = self.kind(kind).read();
            metrics::record_index_counts(kind, guard.len(), guard.key_count());
        }
        metrics::record_serial(self.serial());
    }
}
