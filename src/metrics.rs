//! Metrics instrumentation for k8s-gateway-dns.
//!
//! All metrics are prefixed with `k8s_gw_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::resources::ResourceKind;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::NoData => "nodata",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::NotReady => "not_ready",
    };

    counter!("k8s_gw_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("k8s_gw_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query returned records successfully.
    Success,
    /// Name exists but has no records of the requested type (yet).
    NoData,
    /// Domain not found.
    NxDomain,
    /// Sync gate not open (initial sync incomplete).
    NotReady,
}

/// Record a watch event.
pub fn record_watch_event(kind: ResourceKind, event_type: WatchEventType) {
    let event_str = match event_type {
        WatchEventType::InitialListing => "initial_listing",
        WatchEventType::Added => "added",
        WatchEventType::Updated => "updated",
        WatchEventType::Deleted => "deleted",
        WatchEventType::Synced => "synced",
    };

    counter!("k8s_gw_dns.watch.event.count", "kind" => kind.as_str(), "event" => event_str)
        .increment(1);
}

/// Watch event types.
#[derive(Debug, Clone, Copy)]
pub enum WatchEventType {
    /// Object replayed during the initial listing.
    InitialListing,
    /// New object.
    Added,
    /// Existing object changed.
    Updated,
    /// Object removed.
    Deleted,
    /// Initial listing complete, live streaming starts.
    Synced,
}

/// Record a watch reconnect.
pub fn record_watch_reconnect(kind: ResourceKind, reason: ReconnectReason) {
    let reason_str = match reason {
        ReconnectReason::StreamEnded => "stream_ended",
        ReconnectReason::Error => "error",
        ReconnectReason::Lagged => "lagged",
        ReconnectReason::InitialConnect => "initial_connect",
    };

    counter!("k8s_gw_dns.watch.reconnect.count", "kind" => kind.as_str(), "reason" => reason_str)
        .increment(1);
}

/// Reconnect reasons.
#[derive(Debug, Clone, Copy)]
pub enum ReconnectReason {
    /// Watch stream ended.
    StreamEnded,
    /// Watch encountered an error.
    Error,
    /// Watcher fell behind, full re-list needed.
    Lagged,
    /// First watch of this kind.
    InitialConnect,
}

/// Record index sizes for one kind.
pub fn record_index_counts(kind: ResourceKind, records: usize, keys: usize) {
    gauge!("k8s_gw_dns.index.records", "kind" => kind.as_str()).set(records as f64);
    gauge!("k8s_gw_dns.index.keys", "kind" => kind.as_str()).set(keys as f64);
}

/// Record whether one kind finished its initial listing.
pub fn record_kind_synced(kind: ResourceKind, synced: bool) {
    gauge!("k8s_gw_dns.state.synced", "kind" => kind.as_str()).set(if synced { 1.0 } else { 0.0 });
}

/// Record readiness state.
pub fn record_ready_state(ready: bool) {
    gauge!("k8s_gw_dns.state.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record the SOA serial number.
pub fn record_serial(serial: u32) {
    gauge!("k8s_gw_dns.state.serial").set(serial as f64);
}

/// Record addresses returned for a successful address lookup.
pub fn record_addresses_returned(count: usize) {
    histogram!("k8s_gw_dns.query.addresses_returned").record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
