//! Telemetry store and refresh

use super::NodeHistory;
use crate::cluster::ClusterClient;
use crate::error::{BalancerError, Result};
use crate::models::{NodeInfo, NodeStatus, ResourceKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of one telemetry refresh
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Nodes that produced a sample, in name order
    pub sampled: Vec<String>,
    /// Offline nodes skipped without touching their history
    pub offline: Vec<String>,
    /// Per-node failures (`TelemetryUnavailable`)
    pub failed: Vec<BalancerError>,
    pub elapsed: Duration,
}

impl RefreshReport {
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.failed
            .iter()
            .filter_map(|e| match e {
                BalancerError::TelemetryUnavailable { node, .. } => Some(node.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Copied series of one node
#[derive(Debug, Clone, Default)]
pub struct NodeSeries {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
    pub disk: Vec<f64>,
    pub network: Vec<f64>,
    /// Raw status from the most recent successful refresh
    pub latest: Option<NodeStatus>,
}

impl NodeSeries {
    pub fn get(&self, kind: ResourceKind) -> &[f64] {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
            ResourceKind::Disk => &self.disk,
            ResourceKind::Network => &self.network,
        }
    }

    pub fn has_data(&self) -> bool {
        !self.cpu.is_empty()
    }
}

/// Point-in-time copy of the nodes sampled by the latest refresh
///
/// Nodes that failed or went offline in that refresh are absent, so scoring
/// and classification treat them as having no data.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    nodes: HashMap<String, NodeSeries>,
    /// Number of refreshes applied when the snapshot was taken
    pub generation: u64,
}

impl TelemetrySnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeSeries> {
        self.nodes.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.values().all(|s| !s.has_data())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, name: &str, series: NodeSeries) {
        self.nodes.insert(name.to_string(), series);
    }
}

#[derive(Debug, Default)]
struct StoreState {
    histories: HashMap<String, NodeHistory>,
    latest: HashMap<String, NodeStatus>,
    /// Generation of the refresh that last sampled each node
    sampled_in: HashMap<String, u64>,
    generation: u64,
}

/// Bounded utilization history per node and resource
pub struct TelemetryStore {
    cluster: Arc<dyn ClusterClient>,
    window: usize,
    node_timeout: Duration,
    state: RwLock<StoreState>,
}

impl TelemetryStore {
    pub fn new(cluster: Arc<dyn ClusterClient>, window: usize, node_timeout: Duration) -> Self {
        Self {
            cluster,
            window,
            node_timeout,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// List nodes and sample every online one
    ///
    /// Fails only when the node list itself cannot be fetched.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let nodes = self
            .cluster
            .list_nodes()
            .await
            .map_err(|e| BalancerError::ClusterUnavailable(format!("{:#}", e)))?;
        Ok(self.refresh_nodes(&nodes).await)
    }

    /// Sample the given nodes, skipping offline ones
    pub async fn refresh_nodes(&self, nodes: &[NodeInfo]) -> RefreshReport {
        let start = Instant::now();
        let mut report = RefreshReport::default();
        let mut tasks = JoinSet::new();

        for node in nodes {
            if !node.online {
                report.offline.push(node.name.clone());
                continue;
            }
            let cluster = Arc::clone(&self.cluster);
            let name = node.name.clone();
            let timeout = self.node_timeout;
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, cluster.node_status(&name)).await;
                (name, result)
            });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Telemetry task aborted");
                    continue;
                }
            };
            match result {
                Ok(Ok(status)) => fetched.push((name, status)),
                Ok(Err(e)) => {
                    warn!(event = "telemetry_unavailable", node = %name, error = %e, "Failed to fetch node status");
                    report.failed.push(BalancerError::TelemetryUnavailable {
                        node: name,
                        reason: format!("{:#}", e),
                    });
                }
                Err(_) => {
                    warn!(
                        event = "telemetry_unavailable",
                        node = %name,
                        timeout_ms = self.node_timeout.as_millis() as u64,
                        "Node status request timed out"
                    );
                    report.failed.push(BalancerError::TelemetryUnavailable {
                        node: name,
                        reason: format!("timed out after {:?}", self.node_timeout),
                    });
                }
            }
        }

        fetched.sort_by(|a, b| a.0.cmp(&b.0));
        report.offline.sort();

        {
            let mut state = self.state.write().await;
            state.generation += 1;
            let generation = state.generation;
            for (name, status) in fetched {
                let utilization = status.utilization();
                state
                    .histories
                    .entry(name.clone())
                    .or_insert_with(|| NodeHistory::new(self.window))
                    .record(&utilization);
                state.latest.insert(name.clone(), status);
                state.sampled_in.insert(name.clone(), generation);
                report.sampled.push(name);
            }
        }

        report.elapsed = start.elapsed();
        debug!(
            sampled = report.sampled.len(),
            offline = report.offline.len(),
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Telemetry refresh complete"
        );
        report
    }

    /// Copy the history of every node sampled by the latest refresh
    ///
    /// Histories of nodes missing from that refresh are kept and resume once
    /// the node answers again.
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.state.read().await;
        let nodes = state
            .histories
            .iter()
            .filter(|(name, _)| state.sampled_in.get(*name) == Some(&state.generation))
            .map(|(name, history)| {
                let series = NodeSeries {
                    cpu: history.get(ResourceKind::Cpu).to_vec(),
                    memory: history.get(ResourceKind::Memory).to_vec(),
                    disk: history.get(ResourceKind::Disk).to_vec(),
                    network: history.get(ResourceKind::Network).to_vec(),
                    latest: state.latest.get(name).cloned(),
                };
                (name.clone(), series)
            })
            .collect();
        TelemetrySnapshot {
            nodes,
            generation: state.generation,
        }
    }

    /// True until at least one node has been sampled
    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state
            .histories
            .values()
            .all(|h| h.get(ResourceKind::Cpu).is_empty())
    }

    /// Number of refreshes applied so far
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }
}
