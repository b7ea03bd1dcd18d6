//! Telemetry fan-out. Every successful sample is pushed to each registered
//! sink with its cluster/group/host identity; sinks must not block the sweep,
//! so implementations stick to in-process gauge updates or fire-and-forget
//! datagrams.

use crate::models::NodeStatus;

pub mod prometheus;
pub mod statsd;

pub trait MetricSink: Send + Sync {
    fn send(&self, cluster: &str, group: &str, host: &str, status: &NodeStatus);
}

/// Both sink families build `.`-delimited metric names out of the three
/// identifiers, so any dot inside an identifier (IPv4 hosts, mostly) would
/// split the namespace. Replaced with `-` before dispatch.
pub fn sanitize_node_name(name: &str) -> String {
    name.replace('.', "-")
}
