//! Node selection for new placements and migration targets

use super::{NodeScore, NodeScorer};
use crate::cluster::ClusterClient;
use crate::config::{BalancerConfig, ResourceWeights};
use crate::error::{BalancerError, Result};
use crate::models::{NodeCapacity, WorkloadRequirement};
use crate::telemetry::{TelemetrySnapshot, TelemetryStore};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Ranks nodes with the scorer and applies placement rules
pub struct NodeSelector {
    cluster: Arc<dyn ClusterClient>,
    telemetry: Arc<TelemetryStore>,
    config: Arc<BalancerConfig>,
    weights: RwLock<ResourceWeights>,
}

impl NodeSelector {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        telemetry: Arc<TelemetryStore>,
        config: Arc<BalancerConfig>,
    ) -> Self {
        let weights = RwLock::new(config.resource_weights);
        Self {
            cluster,
            telemetry,
            config,
            weights,
        }
    }

    /// Replace the resource weights, normalizing them if needed
    ///
    /// Operations already running keep the scorer they started with.
    pub async fn set_weights(&self, weights: ResourceWeights) -> Result<ResourceWeights> {
        let normalized = weights.normalized_with_warning()?;
        *self.weights.write().await = normalized;
        info!(
            cpu = normalized.cpu,
            memory = normalized.memory,
            disk = normalized.disk,
            network = normalized.network,
            "Resource weights updated"
        );
        Ok(normalized)
    }

    pub async fn weights(&self) -> ResourceWeights {
        *self.weights.read().await
    }

    /// Scorer bound to the weights in effect right now
    pub async fn scorer(&self) -> NodeScorer {
        NodeScorer::new(self.weights().await, self.config.scoring.clone())
    }

    /// Refresh telemetry if nothing has been sampled yet
    pub async fn ensure_telemetry(&self) {
        if !self.telemetry.is_empty().await {
            return;
        }
        debug!("No telemetry yet, refreshing before scoring");
        if let Err(e) = self.telemetry.refresh().await {
            warn!(error = %e, "Cold-start telemetry refresh failed");
        }
    }

    /// Best node for a workload, or `None` if no node qualifies
    pub async fn select_best_node(
        &self,
        requirement: Option<&WorkloadRequirement>,
        excluded: &[String],
    ) -> Result<Option<String>> {
        let ranked = self.rank_online(requirement, excluded).await?;
        let best = ranked.into_iter().next().map(|s| s.node);
        match &best {
            Some(node) => debug!(node = %node, "Selected node"),
            None => info!("No suitable node for requirement"),
        }
        Ok(best)
    }

    /// Like `select_best_node`, but infeasibility is an error
    pub async fn require_best_node(
        &self,
        requirement: Option<&WorkloadRequirement>,
        excluded: &[String],
    ) -> Result<String> {
        self.select_best_node(requirement, excluded)
            .await?
            .ok_or(BalancerError::InfeasibleRequirement)
    }

    /// Up to `count` eligible nodes, best first
    pub async fn recommend_nodes(
        &self,
        count: usize,
        requirement: Option<&WorkloadRequirement>,
    ) -> Result<Vec<String>> {
        let ranked = self.rank_online(requirement, &[]).await?;
        Ok(ranked.into_iter().take(count).map(|s| s.node).collect())
    }

    async fn rank_online(
        &self,
        requirement: Option<&WorkloadRequirement>,
        excluded: &[String],
    ) -> Result<Vec<NodeScore>> {
        self.ensure_telemetry().await;

        let nodes = self
            .cluster
            .list_nodes()
            .await
            .map_err(|e| BalancerError::ClusterUnavailable(format!("{:#}", e)))?;
        let candidates: Vec<String> = nodes
            .into_iter()
            .filter(|n| n.online && !excluded.contains(&n.name))
            .map(|n| n.name)
            .collect();

        let scorer = self.scorer().await;
        let snapshot = self.telemetry.snapshot().await;
        Ok(self.rank(&scorer, &snapshot, &candidates, requirement).await)
    }

    /// Score `candidates` and return the eligible ones sorted ascending
    ///
    /// The sort is stable, so equal scores keep the candidates' order.
    pub async fn rank(
        &self,
        scorer: &NodeScorer,
        snapshot: &TelemetrySnapshot,
        candidates: &[String],
        requirement: Option<&WorkloadRequirement>,
    ) -> Vec<NodeScore> {
        let blocked = match requirement.and_then(|r| r.anti_affinity_group.as_deref()) {
            Some(group) => self.nodes_hosting(self.anti_affinity_members(group), candidates).await,
            None => HashSet::new(),
        };

        let mut scores = Vec::with_capacity(candidates.len());
        for node in candidates {
            if blocked.contains(node) {
                debug!(node = %node, "Skipping node hosting an anti-affinity peer");
                continue;
            }
            let capacity = match requirement {
                Some(_) => self.capacity_of(node).await,
                None => None,
            };
            let score = scorer.score(snapshot.node(node), capacity.as_ref(), requirement);
            debug!(node = %node, score = score, "Scored node");
            scores.push(NodeScore {
                node: node.clone(),
                score,
            });
        }

        scores.retain(NodeScore::is_eligible);
        scores.sort_by(|a, b| a.score.total_cmp(&b.score));

        if let Some(group) = requirement.and_then(|r| r.affinity_group.as_deref()) {
            let members = self.group_members(group);
            let eligible: Vec<String> = scores.iter().map(|s| s.node.clone()).collect();
            let hosts = self.nodes_hosting(members, &eligible).await;
            if !hosts.is_empty() {
                scores.retain(|s| hosts.contains(&s.node));
            }
        }

        scores
    }

    async fn capacity_of(&self, node: &str) -> Option<NodeCapacity> {
        match tokio::time::timeout(self.config.node_timeout(), self.cluster.node_capacity(node))
            .await
        {
            Ok(Ok(capacity)) => Some(capacity),
            Ok(Err(e)) => {
                warn!(event = "telemetry_unavailable", node = %node, error = %e, "Failed to fetch node capacity");
                None
            }
            Err(_) => {
                warn!(event = "telemetry_unavailable", node = %node, "Node capacity request timed out");
                None
            }
        }
    }

    fn group_members(&self, group: &str) -> Vec<String> {
        self.config.vm_groups.get(group).cloned().unwrap_or_default()
    }

    fn anti_affinity_members(&self, group: &str) -> Vec<String> {
        self.config
            .anti_affinity_groups
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Subset of `nodes` running any of `members`
    ///
    /// A node whose workloads cannot be listed in time is reported as hosting them.
    async fn nodes_hosting(&self, members: Vec<String>, nodes: &[String]) -> HashSet<String> {
        let mut hosts = HashSet::new();
        if members.is_empty() {
            return hosts;
        }
        let timeout = self.config.node_timeout();
        for node in nodes {
            match tokio::time::timeout(timeout, self.cluster.list_workloads(node)).await {
                Ok(Ok(workloads)) => {
                    if workloads
                        .iter()
                        .any(|w| members.iter().any(|m| w.matches(m)))
                    {
                        hosts.insert(node.clone());
                    }
                }
                Ok(Err(e)) => {
                    warn!(node = %node, error = %e, "Failed to list workloads");
                    hosts.insert(node.clone());
                }
                Err(_) => {
                    warn!(
                        node = %node,
                        timeout_ms = timeout.as_millis() as u64,
                        "Listing workloads timed out"
                    );
                    hosts.insert(node.clone());
                }
            }
        }
        hosts
    }
}
