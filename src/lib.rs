//! k8s-gateway-dns - An authoritative DNS server backed by live Kubernetes state.
//!
//! This crate answers DNS queries for the hostnames published by Ingress,
//! Service, Gateway and HTTPRoute objects. It watches the four kinds, keeps an
//! in-memory index of hostname to addresses, and serves A/AAAA records for the
//! configured zones from that index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         k8s-gateway-dns                          │
//! │                                                                  │
//! │  ┌──────────────────┐    ┌──────────────────┐                    │
//! │  │ ResourceStore x4 │───▶│  ClusterIndex    │  one lock per kind │
//! │  │ (watch streams)  │    │  (in-memory)     │                    │
//! │  └──────────────────┘    └────────┬─────────┘                    │
//! │         │                         │                              │
//! │         │ Synced                  ▼                              │
//! │         │                ┌──────────────────┐                    │
//! │         └──▶ SyncGate ──▶│  Resolver        │                    │
//! │                          └────────┬─────────┘                    │
//! │                                   ▼                              │
//! │                          ┌──────────────────┐                    │
//! │                          │  Hickory DNS     │◀── UDP/TCP :53     │
//! │                          │  (one authority  │                    │
//! │                          │   per zone)      │                    │
//! │                          └──────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! svc1.ns1.example.com (zone example.com)
//!   → key "svc1.ns1.example.com", plus "svc1.ns1" for Services
//!   → Ingress hosts, then Service keys, then HTTPRoute hostnames
//!   → HTTPRoutes take the addresses of their parent Gateways
//!   → A/AAAA records for the union of matching addresses
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use k8s_gateway_dns::{DnsConfig, DnsServer, InMemoryCluster, SoaConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig {
//!         listen_addr: "[::]:5353".parse().unwrap(),
//!         zones: vec!["example.com.".to_string()],
//!         ttl: 60,
//!         soa: SoaConfig::default(),
//!     };
//!
//!     let cluster = InMemoryCluster::new();
//!     let server = DnsServer::new(config, cluster.stores());
//!     server.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod error;
pub mod gate;
pub mod index;
pub mod indexer;
pub mod metrics;
pub mod resolver;
pub mod resources;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod watch;
pub mod zones;

// Re-export main types
pub use config::{ClusterConfig, Config, DnsConfig, SoaConfig, TelemetryConfig};
pub use error::{DnsError, StoreError};
pub use gate::SyncGate;
pub use index::ClusterIndex;
pub use resolver::{Resolution, Resolver};
pub use resources::{ClusterObject, ObjectRef, ResourceKind};
pub use server::DnsServer;
pub use store::{ClusterStores, InMemoryCluster, InMemoryStore, ResourceStore, WatchEvent};
