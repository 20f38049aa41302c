//! k8s-gateway-dns binary entry point.

use clap::Parser;
use k8s_gateway_dns::store::parse_seed;
use k8s_gateway_dns::{telemetry, Config, DnsServer, InMemoryCluster};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Authoritative DNS server backed by Kubernetes Ingress, Service and Gateway API state.
#[derive(Parser, Debug)]
#[command(name = "k8s-gateway-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "k8s-gateway-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = ::config::Config::builder()
        .add_source(::config::File::from(args.config.clone()))
        .add_source(
            ::config::Environment::with_prefix("K8S_GATEWAY_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        zones = ?config.dns.zones,
        "Starting k8s-gateway-dns"
    );

    // Fail fast on a bad zone list, before anything is bound
    config.dns.validate()?;

    let cluster = InMemoryCluster::new();
    match &config.cluster.seed_file {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await?;
            let objects = parse_seed(&json)?;
            info!(path = %path.display(), objects = objects.len(), "Loaded cluster seed");
            for object in objects {
                cluster.apply(object);
            }
        }
        None => warn!("No cluster seed configured, serving an empty cluster"),
    }

    // Setup graceful shutdown
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
            }
            cancel.cancel();
        }
    });

    // Run DNS server
    let server = DnsServer::new(config.dns, cluster.stores());
    let result = server.run(cancel).await;

    // Shutdown telemetry
    telemetry::shutdown();

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("k8s-gateway-dns shutdown complete");
    Ok(())
}
