//! Configuration types for k8s-gateway-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::DnsError;
use crate::zones::Zones;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Cluster source configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zones this server is authoritative for (e.g., "example.com.").
    pub zones: Vec<String>,

    /// TTL for DNS records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

impl DnsConfig {
    /// Check the configuration and return the normalized zone set.
    pub fn validate(&self) -> Result<Zones, DnsError> {
        if self.ttl == 0 {
            return Err(DnsError::Config("ttl must be greater than zero".to_string()));
        }
        Zones::new(&self.zones)
    }
}

/// Where cluster objects come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// JSON file of objects (array or Kubernetes `List`) loaded into the
    /// in-memory store at startup.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "k8s_gateway_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "k8s-gateway-dns".to_string()
}

/// SOA (Start of Authority) record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Primary nameserver hostname (e.g., "ns1.example.com").
    pub mname: String,

    /// Admin email in DNS format (e.g., "admin.example.com" for admin@example.com).
    pub rname: String,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

fn default_ttl() -> u32 {
    60
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    600
}

fn default_expire() -> u32 {
    604800
}

fn default_minimum() -> u32 {
    60
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns1.example.com".to_string(),
            rname: "admin.example.com".to_string(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DnsConfig {
        DnsConfig {
            listen_addr: "127.0.0.1:5353".parse().unwrap(),
            zones: vec!["example.com.".to_string()],
            ttl: 60,
            soa: SoaConfig::default(),
        }
    }

    #[test]
    fn test_validate_returns_zones() {
        let zones = base_config().validate().unwrap();
        assert_eq!(zones.iter().collect::<Vec<_>>(), vec!["example.com."]);
    }

    #[test]
    fn test_validate_rejects_missing_zones() {
        let config = DnsConfig {
            zones: Vec::new(),
            ..base_config()
        };
        assert!(matches!(config.validate(), Err(DnsError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = DnsConfig {
            ttl: 0,
            ..base_config()
        };
        assert!(matches!(config.validate(), Err(DnsError::Config(_))));
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(
                r#"
                [dns]
                listen_addr = "[::]:53"
                zones = ["example.com."]
                "#,
                ::config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.dns.ttl, 60);
        assert_eq!(config.dns.soa.refresh, 3600);
        assert!(config.cluster.seed_file.is_none());
        assert_eq!(config.telemetry.log_level, "info");
    }
}
