//! DNS server setup and lifecycle management.

use async_trait::async_trait;
use hickory_proto::op::{Header, OpCode, ResponseCode};
use hickory_server::authority::{AuthorityObject, Catalog, MessageResponseBuilder};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics::{self, QueryResult, Timer};

use crate::authority::KubeAuthority;
use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::gate::SyncGate;
use crate::index::ClusterIndex;
use crate::resolver::Resolver;
use crate::resources::ResourceKind;
use crate::store::ClusterStores;
use crate::watch::WatchHandler;
use crate::zones::Zones;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit state metrics.
async fn metrics_loop(index: ClusterIndex, gate: SyncGate, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                index.emit_metrics();
                gate.emit_metrics();
                debug!(
                    ingresses = index.record_count(ResourceKind::Ingress),
                    services = index.record_count(ResourceKind::Service),
                    gateways = index.record_count(ResourceKind::Gateway),
                    http_routes = index.record_count(ResourceKind::HttpRoute),
                    ready = gate.is_ready(),
                    "emitted state metrics"
                );
            }
            _ = cancel.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Build a catalog with one authority per configured zone.
pub fn build_catalog(
    config: Arc<DnsConfig>,
    zones: &Zones,
    resolver: &Resolver,
    index: &ClusterIndex,
) -> Result<Catalog, DnsError> {
    let mut catalog = Catalog::new();
    for zone in zones.iter() {
        let authority =
            KubeAuthority::new(zone, config.clone(), resolver.clone(), index.clone())?;
        let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
        catalog.upsert(authority.origin().clone(), vec![authority]);
    }
    Ok(catalog)
}

/// Request handler that answers SERVFAIL for in-zone queries until the sync
/// gate opens, then hands everything to the catalog.
///
/// The catalog itself cannot emit SERVFAIL from an authority lookup; a failed
/// lookup comes back as an empty NOERROR, which resolvers would cache.
pub struct GatedCatalog {
    catalog: Catalog,
    zones: Zones,
    gate: SyncGate,
}

impl GatedCatalog {
    /// Wrap `catalog`, holding back queries for `zones` while `gate` is closed.
    pub fn new(catalog: Catalog, zones: Zones, gate: SyncGate) -> Self {
        Self {
            catalog,
            zones,
            gate,
        }
    }

    /// Whether `request` must be refused with SERVFAIL right now.
    fn held_back(&self, request: &Request) -> bool {
        if self.gate.is_ready() || request.header().op_code() != OpCode::Query {
            return false;
        }
        request
            .queries()
            .iter()
            .any(|q| self.zones.matches(&q.name().to_string()).is_some())
    }
}

#[async_trait]
impl RequestHandler for GatedCatalog {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        if !self.held_back(request) {
            return self.catalog.handle_request(request, response_handle).await;
        }

        let timer = Timer::start();
        debug!(pending = ?self.gate.pending(), "Sync gate not open, returning SERVFAIL");
        for query in request.queries() {
            metrics::record_query(
                &query.query_type().to_string(),
                QueryResult::NotReady,
                timer.elapsed(),
            );
        }

        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.error_msg(request.header(), ResponseCode::ServFail);
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send SERVFAIL response: {}", e);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

/// DNS server backed by live cluster state.
pub struct DnsServer {
    config: DnsConfig,
    stores: ClusterStores,
    index: ClusterIndex,
    gate: SyncGate,
}

impl DnsServer {
    /// Create a new DNS server watching `stores`.
    pub fn new(config: DnsConfig, stores: ClusterStores) -> Self {
        Self {
            config,
            stores,
            index: ClusterIndex::new(),
            gate: SyncGate::new(),
        }
    }

    /// Get a reference to the cluster index.
    pub fn index(&self) -> &ClusterIndex {
        &self.index
    }

    /// Get a reference to the sync gate.
    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    /// Run the DNS server until `cancel` fires.
    ///
    /// Queries are served as soon as the sockets are bound; they get SERVFAIL
    /// until every kind has finished its initial listing.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DnsError> {
        let zones = self.config.validate()?;

        info!(
            listen_addr = %self.config.listen_addr,
            zones = ?zones.iter().collect::<Vec<_>>(),
            "Starting k8s-gateway-dns server"
        );

        // Start watch dispatchers
        let watch_handler =
            WatchHandler::new(self.stores.clone(), self.index.clone(), self.gate.clone());
        let watch_cancel = cancel.clone();
        let watch_handle = tokio::spawn(async move {
            if let Err(e) = watch_handler.run(watch_cancel).await {
                error!("Watch handler error: {}", e);
            }
        });

        // Create authorities and catalog
        let resolver = Resolver::new(self.index.clone(), self.gate.clone());
        let config = Arc::new(self.config.clone());
        let catalog = build_catalog(config, &zones, &resolver, &self.index)?;
        let handler = GatedCatalog::new(catalog, zones.clone(), self.gate.clone());

        // Create server
        let mut server = ServerFuture::new(handler);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, Duration::from_secs(30));

        if !self.gate.is_ready() {
            info!(
                pending = ?self.gate.pending(),
                "Waiting for initial sync, answering SERVFAIL until complete"
            );
        }

        // Start metrics loop
        let metrics_handle = tokio::spawn(metrics_loop(
            self.index.clone(),
            self.gate.clone(),
            cancel.clone(),
        ));

        // Run server until cancelled
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        // Wait for metrics loop to stop
        let _ = metrics_handle.await;

        // Wait for watch handler to stop
        info!("Waiting for watch handler to stop...");
        cancel.cancel();
        let _ = watch_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
