//! Shared test infrastructure for resolution integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use k8s_gateway_dns::config::{DnsConfig, SoaConfig};
use k8s_gateway_dns::resources::{
    build_ingress, build_service, object_meta, ClusterObject, Gateway, GatewayAddress, HttpRoute,
    ObjectMetaExt, ParentReference, HOSTNAME_ANNOTATION, LOAD_BALANCER_SERVICE_TYPE,
};
use k8s_gateway_dns::server::{self, GatedCatalog};
use k8s_gateway_dns::{ClusterIndex, ResourceKind, Resolver, SyncGate};

// --- Constants ---

pub const ZONE: &str = "example.com.";

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to `Catalog::handle_request()`.
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        zones: vec![ZONE.to_string()],
        ttl: 60,
        soa: SoaConfig::default(),
    }
}

// --- Object builders ---

pub fn load_balancer_service(ns: &str, name: &str, ips: &[&str]) -> ClusterObject {
    ClusterObject::Service(build_service(ns, name, LOAD_BALANCER_SERVICE_TYPE, ips))
}

pub fn annotated_service(ns: &str, name: &str, hostname: &str, ips: &[&str]) -> ClusterObject {
    let mut svc = build_service(ns, name, "ClusterIP", ips);
    svc.metadata = svc.metadata.with_annotation(HOSTNAME_ANNOTATION, hostname);
    ClusterObject::Service(svc)
}

pub fn ingress(ns: &str, name: &str, hosts: &[&str], ips: &[&str]) -> ClusterObject {
    ClusterObject::Ingress(build_ingress(ns, name, hosts, ips))
}

pub fn gateway(ns: &str, name: &str, addresses: &[&str]) -> ClusterObject {
    let mut gw = Gateway {
        metadata: object_meta(ns, name),
        ..Default::default()
    };
    gw.status.addresses = addresses
        .iter()
        .map(|a| GatewayAddress {
            type_: None,
            value: a.to_string(),
        })
        .collect();
    ClusterObject::Gateway(gw)
}

pub fn http_route(ns: &str, name: &str, hostnames: &[&str], parents: &[&str]) -> ClusterObject {
    let mut route = HttpRoute {
        metadata: object_meta(ns, name),
        ..Default::default()
    };
    route.spec.hostnames = hostnames.iter().map(|h| h.to_string()).collect();
    route.spec.parent_refs = parents.iter().map(|p| ParentReference::gateway(p)).collect();
    ClusterObject::HttpRoute(route)
}

// --- Index builder ---

pub struct TestIndexBuilder {
    index: ClusterIndex,
    gate: SyncGate,
}

impl TestIndexBuilder {
    pub fn new() -> Self {
        Self {
            index: ClusterIndex::new(),
            gate: SyncGate::new(),
        }
    }

    pub fn with(self, object: ClusterObject) -> Self {
        self.index.upsert(&object);
        self
    }

    /// Mark every kind synced and return the index and gate.
    pub fn build(self) -> (ClusterIndex, SyncGate) {
        for kind in ResourceKind::ALL {
            self.gate.mark_synced(kind);
        }
        (self.index, self.gate)
    }

    /// Return the index and gate WITHOUT marking anything synced.
    pub fn build_not_ready(self) -> (ClusterIndex, SyncGate) {
        (self.index, self.gate)
    }
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a loopback client.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

/// Build the gated catalog the server runs, serving the configured zones from `index`.
pub fn build_catalog(config: DnsConfig, index: ClusterIndex, gate: SyncGate) -> GatedCatalog {
    let zones = config.validate().expect("invalid test zones");
    let resolver = Resolver::new(index.clone(), gate.clone());
    let catalog = server::build_catalog(Arc::new(config), &zones, &resolver, &index)
        .expect("failed to build catalog");
    GatedCatalog::new(catalog, zones, gate)
}

// --- Response helpers ---

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &GatedCatalog,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract AAAA addresses from a response.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected IPs.
pub fn assert_a_response(msg: &Message, expected_ips: &[&str]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg);
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.iter().map(|ip| ip.parse().unwrap()).collect();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}

/// Poll `check` until it holds or the timeout expires.
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
