//! Real UDP loopback tests: a `ServerFuture` bound to 127.0.0.1 on a random
//! port, queried over the wire.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;
use hickory_server::ServerFuture;
use tokio::net::UdpSocket;

use k8s_gateway_dns::server::GatedCatalog;
use k8s_gateway_dns::ResourceKind;

use common::*;

/// A test DNS server running on a random port.
struct TestServer {
    addr: SocketAddr,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    async fn start(handler: GatedCatalog) -> Self {
        let udp_socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind UDP socket");
        let addr = udp_socket.local_addr().expect("failed to get local addr");

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut server = ServerFuture::new(handler);
            server.register_socket(udp_socket);

            tokio::select! {
                result = server.block_until_done() => {
                    if let Err(e) = result {
                        eprintln!("server error: {}", e);
                    }
                }
                _ = rx => {}
            }
        });

        Self {
            addr,
            _shutdown: tx,
        }
    }
}

/// Send a DNS query and return the parsed response.
async fn query(server: SocketAddr, name: &str, record_type: RecordType, id: u16) -> Message {
    let sock = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("failed to bind client socket");
    let query_bytes = build_query_bytes(name, record_type, id);

    sock.send_to(&query_bytes, server)
        .await
        .expect("failed to send query");

    let mut buf = vec![0u8; 4096];
    let len = tokio::time::timeout(Duration::from_secs(5), sock.recv(&mut buf))
        .await
        .expect("query timed out")
        .expect("failed to recv response");

    let msg = Message::from_vec(&buf[..len]).expect("failed to parse DNS response");
    assert_eq!(msg.id(), id);
    msg
}

#[tokio::test]
async fn loopback_resolves_service() {
    let (index, gate) = TestIndexBuilder::new()
        .with(load_balancer_service("ns1", "svc1", &["192.0.0.1"]))
        .build();
    let server = TestServer::start(build_catalog(test_dns_config(), index, gate)).await;

    let msg = query(server.addr, "svc1.ns1.example.com.", RecordType::A, 1).await;
    assert_a_response(&msg, &["192.0.0.1"]);
}

#[tokio::test]
async fn loopback_servfail_until_synced() {
    let (index, gate) = TestIndexBuilder::new()
        .with(load_balancer_service("ns1", "svc1", &["192.0.0.1"]))
        .build_not_ready();
    let server =
        TestServer::start(build_catalog(test_dns_config(), index, gate.clone())).await;

    let msg = query(server.addr, "svc1.ns1.example.com.", RecordType::A, 2).await;
    assert_response_code(&msg, ResponseCode::ServFail);

    for kind in ResourceKind::ALL {
        gate.mark_synced(kind);
    }

    let msg = query(server.addr, "svc1.ns1.example.com.", RecordType::A, 3).await;
    assert_a_response(&msg, &["192.0.0.1"]);
}

#[tokio::test]
async fn loopback_nxdomain_and_refused() {
    let (index, gate) = TestIndexBuilder::new().build();
    let server = TestServer::start(build_catalog(test_dns_config(), index, gate)).await;

    let msg = query(server.addr, "missing.example.com.", RecordType::A, 4).await;
    assert_response_code(&msg, ResponseCode::NXDomain);

    let msg = query(server.addr, "missing.example.org.", RecordType::A, 5).await;
    assert_response_code(&msg, ResponseCode::Refused);
}
