//! The poller/aggregator orchestrator. Owns the aggregated status tree,
//! drives scheduled sweeps over the whole topology, and exposes the
//! on-demand operations (refresh, targeted reset, snapshot) the API layer
//! calls into.
//!
//! Per-host failures during a sweep are logged and skipped; a host that never
//! answered keeps its placeholder entry. Only the explicit reset operation
//! propagates errors to its caller.

use crate::agent::{AgentClient, AgentError};
use crate::config::{ClusterConfig, GroupConfig};
use crate::metrics::{sanitize_node_name, MetricSink};
use crate::models::NodeStatus;
use crate::state::{new_state, Shared, StatusTree};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub type SharedObserver = Arc<Observer>;

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("unknown target {cluster}/{group}/{host}")]
    UnknownTarget {
        cluster: String,
        group: String,
        host: String,
    },
    #[error("status sweeps are already scheduled")]
    AlreadyScheduled,
    #[error("sweep interval must be non-zero")]
    ZeroInterval,
    #[error(transparent)]
    Agent(#[from] AgentError),
}

pub struct Observer {
    clusters: HashMap<String, ClusterConfig>,
    agent: AgentClient,
    sinks: Vec<Box<dyn MetricSink>>,
    statuses: Shared<StatusTree>,
    // stop handle for the timer task; Some while scheduled
    scheduler: Mutex<Option<watch::Sender<bool>>>,
}

impl Observer {
    pub fn new(clusters: HashMap<String, ClusterConfig>, agent: AgentClient) -> Self {
        Self {
            clusters,
            agent,
            sinks: Vec::new(),
            statuses: new_state(StatusTree::default()),
            scheduler: Mutex::new(None),
        }
    }

    /// Registers one more telemetry sink. Order of registration is the order
    /// of dispatch; zero sinks is fine.
    pub fn add_sink(&mut self, sink: Box<dyn MetricSink>) {
        self.sinks.push(sink);
    }

    /// Handle to the aggregated tree, shared with the API layer for reads.
    pub fn statuses(&self) -> Shared<StatusTree> {
        self.statuses.clone()
    }

    /// Starts the periodic sweep schedule: the tree is reset to placeholders
    /// mirroring the topology, one sweep runs immediately, then one every
    /// `every`. Rejected if a schedule is already running or `every` is zero.
    pub fn start_scheduling(
        observer: SharedObserver,
        every: Duration,
    ) -> Result<(), ObserverError> {
        // interval() panics on a zero period; reject it here, before the
        // scheduler slot is taken
        if every.is_zero() {
            return Err(ObserverError::ZeroInterval);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        {
            let mut slot = observer.scheduler.lock();
            if slot.is_some() {
                return Err(ObserverError::AlreadyScheduled);
            }
            *slot = Some(stop_tx);
        }

        observer.statuses.lock().mirror(&observer.clusters);
        info!("scheduling status sweeps every {}s", every.as_secs());

        let worker = observer.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // a sweep that overruns the period must not trigger catch-up
            // sweeps; late ticks are dropped
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    // an in-flight sweep always finishes: the stop signal is
                    // only observed between ticks
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => worker.sweep().await,
                }
            }
            info!("status sweep schedule stopped");
        });
        Ok(())
    }

    /// Halts the sweep timer. A sweep already in flight finishes normally.
    pub fn stop_scheduling(&self) {
        if let Some(stop) = self.scheduler.lock().take() {
            info!("stopping status sweep schedule");
            let _ = stop.send(true);
        }
    }

    /// One extra sweep outside the timer schedule; the timer's phase is not
    /// affected.
    pub async fn refresh(&self) {
        self.sweep().await;
    }

    async fn sweep(&self) {
        debug!("starting status sweep");
        for (cluster_name, cluster) in &self.clusters {
            for (group_name, group) in &cluster.groups {
                for host in &group.hosts {
                    self.poll_host(cluster_name, group_name, group, host).await;
                }
            }
        }
    }

    async fn poll_host(&self, cluster: &str, group_name: &str, group: &GroupConfig, host: &str) {
        let outcome = self.agent.fetch(group, host).await;
        let status = match outcome.and_then(|raw| crate::parser::parse(&raw)) {
            Ok(status) => status,
            Err(e) => {
                warn!("skipping {cluster}/{group_name}/{host}: {e}");
                return;
            }
        };

        self.statuses
            .lock()
            .record(cluster, group_name, host, status.clone());
        self.fan_out(cluster, group_name, host, &status);
    }

    fn fan_out(&self, cluster: &str, group: &str, host: &str, status: &NodeStatus) {
        if self.sinks.is_empty() {
            return;
        }
        let cluster = sanitize_node_name(cluster);
        let group = sanitize_node_name(group);
        let host = sanitize_node_name(host);
        for sink in &self.sinks {
            sink.send(&cluster, &group, &host, status);
        }
    }

    /// Remote cache reset for one host. A rejected reset leaves all state
    /// untouched; an accepted one is followed by an immediate fetch of that
    /// host so the tree reflects the post-reset cache without waiting for the
    /// next sweep.
    pub async fn reset_target(
        &self,
        cluster: &str,
        group: &str,
        host: &str,
    ) -> Result<(), ObserverError> {
        let group_cfg = self.lookup_group(cluster, group, host)?;
        self.agent.trigger_reset(group_cfg, host).await?;
        info!("opcache reset accepted by {cluster}/{group}/{host}");
        self.poll_host(cluster, group, group_cfg, host).await;
        Ok(())
    }

    fn lookup_group(
        &self,
        cluster: &str,
        group: &str,
        host: &str,
    ) -> Result<&GroupConfig, ObserverError> {
        self.clusters
            .get(cluster)
            .and_then(|c| c.groups.get(group))
            .filter(|g| g.hosts.iter().any(|h| h == host))
            .ok_or_else(|| ObserverError::UnknownTarget {
                cluster: cluster.to_string(),
                group: group.to_string(),
                host: host.to_string(),
            })
    }

    /// Point-in-time copy of the aggregated tree, safe against concurrent
    /// sweeps.
    pub fn snapshot(&self) -> StatusTree {
        self.statuses.lock().clone()
    }
}
