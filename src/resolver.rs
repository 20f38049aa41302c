//! Hostname resolution over the composite index.
//!
//! ```text
//! qname (in zone)
//!   → NotReady until the sync gate opens
//!   → candidate keys: full name; Services also try the zone-relative name
//!   → Ingress, then Service, then HTTPRoute; first kind with a match wins
//!   → union of every contributor's addresses, sorted
//! ```

use hickory_proto::rr::RecordType;
use std::collections::BTreeSet;
use tracing::trace;

use crate::gate::SyncGate;
use crate::index::{ClusterIndex, IndexedRecord};
use crate::resources::ResourceKind;
use crate::zones;

/// Kinds consulted for a query, highest priority first. Gateways are only
/// reachable through an HTTPRoute join.
pub const RESOLUTION_ORDER: [ResourceKind; 3] = [
    ResourceKind::Ingress,
    ResourceKind::Service,
    ResourceKind::HttpRoute,
];

/// Outcome of resolving one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Distinct addresses, sorted lexicographically. Never empty.
    Addresses(Vec<String>),
    /// No object publishes this name.
    NotFound,
    /// Initial sync has not completed; the answer would not be trustworthy.
    NotReady,
    /// The name is known but no address has been published yet.
    PendingAddress,
}

/// Whether the resolver handles this query type.
pub fn is_address_type(qtype: RecordType) -> bool {
    matches!(qtype, RecordType::A | RecordType::AAAA)
}

/// Resolves query names against the cluster index.
#[derive(Debug, Clone)]
pub struct Resolver {
    index: ClusterIndex,
    gate: SyncGate,
}

impl Resolver {
    /// Create a resolver reading `index`, answering only once `gate` is ready.
    pub fn new(index: ClusterIndex, gate: SyncGate) -> Self {
        Self { index, gate }
    }

    /// Resolve `qname` inside `zone` for an address query.
    ///
    /// Returns `None` for non-address query types, which are left to the caller.
    pub fn resolve(&self, qname: &str, zone: &str, qtype: RecordType) -> Option<Resolution> {
        if !is_address_type(qtype) {
            return None;
        }
        Some(self.resolve_name(qname, zone))
    }

    /// Resolve `qname` inside `zone` regardless of query type.
    pub fn resolve_name(&self, qname: &str, zone: &str) -> Resolution {
        if !self.gate.is_ready() {
            return Resolution::NotReady;
        }

        let qname = zones::normalize(qname);
        let zone = zones::normalize(zone);
        for kind in RESOLUTION_ORDER {
            let candidates = candidate_keys(kind, &qname, &zone);
            let keys: Vec<&str> = candidates.iter().map(String::as_str).collect();
            let records = self.index.lookup(kind, &keys);
            if records.is_empty() {
                continue;
            }

            let addresses: BTreeSet<String> = records
                .iter()
                .flat_map(|record| self.addresses_of(record))
                .filter(|a| !a.is_empty())
                .collect();

            trace!(
                name = %qname,
                %kind,
                contributors = records.len(),
                addresses = addresses.len(),
                "matched index"
            );

            return if addresses.is_empty() {
                Resolution::PendingAddress
            } else {
                Resolution::Addresses(addresses.into_iter().collect())
            };
        }

        Resolution::NotFound
    }

    fn addresses_of(&self, record: &IndexedRecord) -> Vec<String> {
        match record.object.kind {
            ResourceKind::HttpRoute => self.index.join_addresses(&record.parents),
            _ => record.addresses.clone(),
        }
    }
}

/// Keys a query may match for `kind`. Ingress and HTTPRoute hosts match the
/// full name only; Service keys such as `<name>.<namespace>` are zone-relative,
/// so Services also try the name with the zone stripped.
fn candidate_keys(kind: ResourceKind, qname: &str, zone: &str) -> Vec<String> {
    let mut keys = vec![qname.trim_end_matches('.').to_string()];
    if kind != ResourceKind::Service {
        return keys;
    }
    if let Some(relative) = zones::relative_to(qname, zone) {
        if !keys.contains(&relative) {
            keys.push(relative);
        }
    }
    keys
}
