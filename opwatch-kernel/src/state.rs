use crate::config::ClusterConfig;
use crate::models::{FleetStatusMap, NodeStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Aggregated fleet state: latest sample per host plus the timestamp of the
/// last successful refresh anywhere in the fleet. Always accessed through a
/// `Shared<StatusTree>` lock, which is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct StatusTree {
    pub nodes: FleetStatusMap,
    pub last_update: Option<OffsetDateTime>,
}

impl StatusTree {
    /// Resets the tree to placeholder entries mirroring the topology, one
    /// zero-valued status per configured host. Fetch failures later on leave
    /// these entries untouched, so the key set never drifts from the config.
    pub fn mirror(&mut self, clusters: &HashMap<String, ClusterConfig>) {
        let mut nodes = FleetStatusMap::new();
        for (cluster_name, cluster) in clusters {
            let cluster_entry = nodes.entry(cluster_name.clone()).or_default();
            for (group_name, group) in &cluster.groups {
                let group_entry = cluster_entry.entry(group_name.clone()).or_default();
                for host in &group.hosts {
                    group_entry.insert(host.clone(), NodeStatus::default());
                }
            }
        }
        self.nodes = nodes;
        self.last_update = None;
    }

    /// Overwrites one host's sample and advances `last_update`.
    pub fn record(&mut self, cluster: &str, group: &str, host: &str, status: NodeStatus) {
        self.nodes
            .entry(cluster.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default()
            .insert(host.to_string(), status);
        self.last_update = Some(OffsetDateTime::now_utc());
    }

    pub fn get(&self, cluster: &str, group: &str, host: &str) -> Option<&NodeStatus> {
        self.nodes.get(cluster)?.get(group)?.get(host)
    }
}
