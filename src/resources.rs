//! Cluster object model for the four watched resource kinds.
//!
//! Services, Ingresses and object metadata are the `k8s-openapi` types, so
//! objects deserialize straight from API responses or fixture files. The
//! Gateway API kinds are not part of `k8s-openapi`; they are modelled here
//! with only the fields the indexer reads, on the same `ObjectMeta`.

use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus,
};
use k8s_openapi::api::networking::v1::{
    IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressRule, IngressSpec, IngressStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use k8s_openapi::api::core::v1::Service;
pub use k8s_openapi::api::networking::v1::Ingress;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Annotation overriding the hostname a Service is published under.
pub const HOSTNAME_ANNOTATION: &str = "coredns.io/hostname";

/// API group of Gateway API resources.
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Service `spec.type` of Services published under `<name>.<namespace>`.
pub const LOAD_BALANCER_SERVICE_TYPE: &str = "LoadBalancer";

/// The resource kinds this server watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// `networking.k8s.io/v1` Ingress.
    Ingress,
    /// `v1` Service.
    Service,
    /// Gateway API Gateway.
    Gateway,
    /// Gateway API HTTPRoute.
    #[serde(rename = "HTTPRoute")]
    HttpRoute,
}

impl ResourceKind {
    /// Every watched kind. The sync gate waits for all of them.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Ingress,
        ResourceKind::Service,
        ResourceKind::Gateway,
        ResourceKind::HttpRoute,
    ];

    /// Kind name as it appears in the `kind` field of an object.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Service => "Service",
            ResourceKind::Gateway => "Gateway",
            ResourceKind::HttpRoute => "HTTPRoute",
        }
    }

    /// Dense position of this kind, used to address per-kind slots.
    pub(crate) fn slot(self) -> usize {
        match self {
            ResourceKind::Ingress => 0,
            ResourceKind::Service => 1,
            ResourceKind::Gateway => 2,
            ResourceKind::HttpRoute => 3,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cluster object: kind, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Namespace the object lives in.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectRef {
    /// Build a reference from its parts.
    pub fn new(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Read access to the optional fields of [`ObjectMeta`].
pub trait ObjectMetaExt {
    /// Object name, or empty when unset.
    fn name_or_empty(&self) -> &str;

    /// Namespace, or empty for cluster-scoped objects.
    fn namespace_or_empty(&self) -> &str;

    /// Value of one annotation.
    fn annotation(&self, key: &str) -> Option<&str>;

    /// Add an annotation, builder style.
    fn with_annotation(self, key: &str, value: &str) -> Self;
}

impl ObjectMetaExt for ObjectMeta {
    fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.as_ref()?.get(key).map(String::as_str)
    }

    fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }
}

/// Metadata with no annotations.
pub fn object_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// `spec.type` of a Service, when set.
pub fn service_type(svc: &Service) -> Option<&str> {
    svc.spec.as_ref()?.type_.as_deref()
}

/// Load-balancer addresses of a Service in status order. An entry
/// contributes its IP, or its hostname when no IP is set.
pub fn service_addresses(svc: &Service) -> Vec<String> {
    let entries = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default();
    entries
        .iter()
        .filter_map(|lb| ip_or_hostname(lb.ip.as_deref(), lb.hostname.as_deref()))
        .collect()
}

/// Hosts of every Ingress rule, including empty catch-all hosts.
pub fn ingress_hosts(ing: &Ingress) -> impl Iterator<Item = &str> {
    ing.spec
        .as_ref()
        .and_then(|s| s.rules.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|r| r.host.as_deref().unwrap_or_default())
}

/// Load-balancer addresses of an Ingress, with the same rules as
/// [`service_addresses`].
pub fn ingress_addresses(ing: &Ingress) -> Vec<String> {
    let entries = ing
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default();
    entries
        .iter()
        .filter_map(|lb| ip_or_hostname(lb.ip.as_deref(), lb.hostname.as_deref()))
        .collect()
}

fn ip_or_hostname(ip: Option<&str>, hostname: Option<&str>) -> Option<String> {
    [ip, hostname]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// A Service of the given `spec.type` publishing `ips` in its load-balancer
/// status. Used to seed stores programmatically.
pub fn build_service(namespace: &str, name: &str, type_: &str, ips: &[&str]) -> Service {
    Service {
        metadata: object_meta(namespace, name),
        spec: Some(ServiceSpec {
            type_: Some(type_.to_string()),
            ..Default::default()
        }),
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(
                    ips.iter()
                        .map(|ip| LoadBalancerIngress {
                            ip: Some(ip.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
            ..Default::default()
        }),
    }
}

/// An Ingress with one rule per host publishing `ips` in its load-balancer
/// status.
pub fn build_ingress(namespace: &str, name: &str, hosts: &[&str], ips: &[&str]) -> Ingress {
    Ingress {
        metadata: object_meta(namespace, name),
        spec: Some(IngressSpec {
            rules: Some(
                hosts
                    .iter()
                    .map(|h| IngressRule {
                        host: Some(h.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: Some(IngressStatus {
            load_balancer: Some(IngressLoadBalancerStatus {
                ingress: Some(
                    ips.iter()
                        .map(|ip| IngressLoadBalancerIngress {
                            ip: Some(ip.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
        }),
    }
}

/// Gateway `spec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySpec {
    /// GatewayClass this Gateway is an instance of.
    pub gateway_class_name: String,
}

/// An address assigned to a Gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayAddress {
    /// Address type, such as `IPAddress` or `Hostname`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// The address itself.
    pub value: String,
}

/// Gateway `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayStatus {
    /// Addresses assigned to the Gateway.
    pub addresses: Vec<GatewayAddress>,
}

/// A Gateway API Gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gateway {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: GatewaySpec,
    /// Observed state.
    pub status: GatewayStatus,
}

/// Reference from an HTTPRoute to the Gateway accepting its traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParentReference {
    /// API group of the parent; the Gateway API group when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind of the parent; `Gateway` when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Namespace of the parent; the route's namespace when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the parent.
    pub name: String,
    /// Listener on the parent, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl ParentReference {
    /// Reference a Gateway in the route's own namespace.
    pub fn gateway(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Whether this reference points at a Gateway. Group and kind default to
    /// the Gateway API group and `Gateway` when omitted.
    pub fn targets_gateway(&self) -> bool {
        let group_ok = self
            .group
            .as_deref()
            .map_or(true, |g| g == GATEWAY_API_GROUP);
        let kind_ok = self.kind.as_deref().map_or(true, |k| k == "Gateway");
        group_ok && kind_ok && !self.name.is_empty()
    }
}

/// HTTPRoute `spec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Gateways this route attaches to.
    pub parent_refs: Vec<ParentReference>,
    /// Hostnames the route serves.
    pub hostnames: Vec<String>,
}

/// A Gateway API HTTPRoute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRoute {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: HttpRouteSpec,
}

/// Any watched object, tagged by its `kind` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind")]
pub enum ClusterObject {
    /// An Ingress.
    Ingress(Ingress),
    /// A Service.
    Service(Service),
    /// A Gateway.
    Gateway(Gateway),
    /// An HTTPRoute.
    #[serde(rename = "HTTPRoute")]
    HttpRoute(HttpRoute),
}

impl ClusterObject {
    /// Kind of the wrapped object.
    pub fn kind(&self) -> ResourceKind {
        match self {
            ClusterObject::Ingress(_) => ResourceKind::Ingress,
            ClusterObject::Service(_) => ResourceKind::Service,
            ClusterObject::Gateway(_) => ResourceKind::Gateway,
            ClusterObject::HttpRoute(_) => ResourceKind::HttpRoute,
        }
    }

    /// Metadata of the wrapped object.
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ClusterObject::Ingress(o) => &o.metadata,
            ClusterObject::Service(o) => &o.metadata,
            ClusterObject::Gateway(o) => &o.metadata,
            ClusterObject::HttpRoute(o) => &o.metadata,
        }
    }

    /// Identity of the wrapped object.
    pub fn object_ref(&self) -> ObjectRef {
        let meta = self.metadata();
        ObjectRef::new(self.kind(), meta.namespace_or_empty(), meta.name_or_empty())
    }
}

/// A typed resource that can be stored, watched and indexed.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind of this resource type.
    const KIND: ResourceKind;

    /// Object metadata.
    fn metadata(&self) -> &ObjectMeta;

    /// Wrap into the kind-tagged object the indexer works on.
    fn into_object(self) -> ClusterObject;

    /// Recover the typed resource from a tagged object of the same kind.
    fn from_object(object: ClusterObject) -> Option<Self>;

    /// Identity of this object.
    fn object_ref(&self) -> ObjectRef {
        let meta = self.metadata();
        ObjectRef::new(Self::KIND, meta.namespace_or_empty(), meta.name_or_empty())
    }
}

macro_rules! impl_resource {
    ($ty:ident, $variant:ident) => {
        impl Resource for $ty {
            const KIND: ResourceKind = ResourceKind::$variant;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn into_object(self) -> ClusterObject {
                ClusterObject::$variant(self)
            }

            fn from_object(object: ClusterObject) -> Option<Self> {
                match object {
                    ClusterObject::$variant(o) => Some(o),
                    _ => None,
                }
            }
        }
    };
}

impl_resource!(Ingress, Ingress);
impl_resource!(Service, Service);
impl_resource!(Gateway, Gateway);
impl_resource!(HttpRoute, HttpRoute);
