//! Error types for k8s-gateway-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Resource store error
    #[error("Resource store error: {0}")]
    Store(#[from] StoreError),

    /// Cluster seed file could not be decoded
    #[error("Invalid cluster seed: {0}")]
    Seed(#[from] serde_json::Error),

    /// Initial sync has not completed; answers would be untrustworthy.
    #[error("DNS state not ready - initial sync incomplete")]
    NotReady,
}

/// Errors surfaced by a resource store or its watch streams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The watcher fell behind and dropped events; it must re-list.
    #[error("watch lagged, {0} events dropped")]
    Lagged(u64),

    /// An object with the same namespace and name already exists.
    #[error("object {0} already exists")]
    AlreadyExists(String),

    /// No object with that namespace and name exists.
    #[error("object {0} not found")]
    NotFound(String),
}
