//! Hostname indexer: maps one cluster object to its index keys and addresses.
//!
//! | kind      | keys                                              | addresses                  |
//! |-----------|---------------------------------------------------|----------------------------|
//! | Service   | `coredns.io/hostname`, else `<name>.<namespace>` for LoadBalancer | LB status  |
//! | Ingress   | every non-empty rule host                         | LB status                  |
//! | Gateway   | `<namespace>/<name>` (join key only)              | `status.addresses`         |
//! | HTTPRoute | every declared hostname                           | via parent Gateway join    |
//!
//! Every function here is total: a malformed object yields no keys rather
//! than an error, which keeps it out of the index.

use std::collections::BTreeSet;

use crate::resources::{
    ingress_addresses, ingress_hosts, service_addresses, service_type, ClusterObject, Gateway,
    HttpRoute, Ingress, ObjectMetaExt, Service, HOSTNAME_ANNOTATION, LOAD_BALANCER_SERVICE_TYPE,
};

/// What one object contributes to the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Normalized lookup keys.
    pub keys: BTreeSet<String>,
    /// Addresses published in the object status, in status order.
    pub addresses: Vec<String>,
    /// Gateway join keys this object takes its addresses from (HTTPRoute only).
    pub parents: Vec<String>,
}

/// Compute the index entry for any watched object.
pub fn index(object: &ClusterObject) -> IndexEntry {
    match object {
        ClusterObject::Ingress(ing) => index_ingress(ing),
        ClusterObject::Service(svc) => index_service(svc),
        ClusterObject::Gateway(gw) => index_gateway(gw),
        ClusterObject::HttpRoute(route) => index_http_route(route),
    }
}

/// Lower-case a hostname and drop surrounding whitespace and trailing dots.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Key joining HTTPRoutes to their parent Gateway.
pub fn gateway_join_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn key_set<'a>(raw: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    raw.into_iter()
        .map(normalize_key)
        .filter(|k| !k.is_empty())
        .collect()
}

/// Service keys: the hostname annotation when set, else `<name>.<namespace>`
/// for `LoadBalancer` Services. Other Services are not published.
pub fn index_service(svc: &Service) -> IndexEntry {
    let meta = &svc.metadata;

    let keys = match meta.annotation(HOSTNAME_ANNOTATION) {
        Some(hostname) if !hostname.trim().is_empty() => key_set([hostname]),
        _ if service_type(svc) == Some(LOAD_BALANCER_SERVICE_TYPE) => {
            let default_key = format!("{}.{}", meta.name_or_empty(), meta.namespace_or_empty());
            key_set([default_key.as_str()])
        }
        _ => BTreeSet::new(),
    };

    IndexEntry {
        keys,
        addresses: service_addresses(svc),
        parents: Vec::new(),
    }
}

/// Ingress keys: the host of every rule.
pub fn index_ingress(ing: &Ingress) -> IndexEntry {
    IndexEntry {
        keys: key_set(ingress_hosts(ing)),
        addresses: ingress_addresses(ing),
        parents: Vec::new(),
    }
}

/// Gateway keys: the `<namespace>/<name>` join key HTTPRoutes reference.
pub fn index_gateway(gw: &Gateway) -> IndexEntry {
    let meta = &gw.metadata;
    let mut keys = BTreeSet::new();
    keys.insert(gateway_join_key(meta.namespace_or_empty(), meta.name_or_empty()));

    IndexEntry {
        keys,
        addresses: gw
            .status
            .addresses
            .iter()
            .map(|a| a.value.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect(),
        parents: Vec::new(),
    }
}

/// HTTPRoute keys: its hostnames, joined to the Gateways in its parent refs.
pub fn index_http_route(route: &HttpRoute) -> IndexEntry {
    let meta = &route.metadata;

    let mut parents: Vec<String> = route
        .spec
        .parent_refs
        .iter()
        .filter(|p| p.targets_gateway())
        .map(|p| {
            let ns = p.namespace.as_deref().unwrap_or(meta.namespace_or_empty());
            gateway_join_key(ns, &p.name)
        })
        .collect();
    // Several listeners (section names) of one Gateway collapse to one join.
    parents.sort();
    parents.dedup();

    IndexEntry {
        keys: key_set(route.spec.hostnames.iter().map(String::as_str)),
        addresses: Vec::new(),
        parents,
    }
}
