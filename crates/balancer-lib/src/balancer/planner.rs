//! Node classification and migration planning for one balance cycle

use super::MigrationHistory;
use crate::cluster::ClusterClient;
use crate::config::{BalancerConfig, ResourceWeights};
use crate::models::{
    clamp_ratio, ImpactEstimate, MigrationRecommendation, NodeStatus, WorkloadInfo,
    WorkloadRequirement,
};
use crate::scoring::{NodeScore, NodeScorer, NodeSelector};
use crate::telemetry::TelemetrySnapshot;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Load class of a node relative to the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadClass {
    Overloaded,
    Balanced,
    Underloaded,
    NoData,
}

impl LoadClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadClass::Overloaded => "overloaded",
            LoadClass::Balanced => "balanced",
            LoadClass::Underloaded => "underloaded",
            LoadClass::NoData => "no_data",
        }
    }
}

impl fmt::Display for LoadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blended load and class of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLoad {
    pub node: String,
    pub load: Option<f64>,
    pub class: LoadClass,
}

/// Classify nodes by blended load; loads inside `[low, high]` are balanced
pub fn classify(
    scorer: &NodeScorer,
    snapshot: &TelemetrySnapshot,
    nodes: &[String],
    high: f64,
    low: f64,
) -> Vec<NodeLoad> {
    nodes
        .iter()
        .map(|node| {
            let load = snapshot.node(node).and_then(|s| scorer.blended_load(s));
            let class = match load {
                None => LoadClass::NoData,
                Some(l) if l > high => LoadClass::Overloaded,
                Some(l) if l < low => LoadClass::Underloaded,
                Some(_) => LoadClass::Balanced,
            };
            NodeLoad {
                node: node.clone(),
                load,
                class,
            }
        })
        .collect()
}

/// Why a workload was left in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Excluded,
    GroupConstrained,
    CoolingDown,
    NoTarget,
    BudgetExhausted,
    StopRequested,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Excluded => "excluded",
            SkipReason::GroupConstrained => "group_constrained",
            SkipReason::CoolingDown => "cooling_down",
            SkipReason::NoTarget => "no_target",
            SkipReason::BudgetExhausted => "budget_exhausted",
            SkipReason::StopRequested => "stop_requested",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedMigration {
    pub workload_id: String,
    pub source_node: String,
    pub reason: SkipReason,
}

impl SkippedMigration {
    fn new(workload: &WorkloadInfo, reason: SkipReason) -> Self {
        Self {
            workload_id: workload.id.clone(),
            source_node: workload.node.clone(),
            reason,
        }
    }
}

/// A workload, or a whole affinity group, moving to one target
#[derive(Debug, Clone)]
pub struct PlannedMove {
    pub workloads: Vec<WorkloadInfo>,
    pub source_node: String,
    pub target_node: String,
    pub impact: ImpactEstimate,
    pub reason: String,
}

impl PlannedMove {
    pub fn recommendations(&self) -> Vec<MigrationRecommendation> {
        self.workloads
            .iter()
            .map(|w| MigrationRecommendation {
                workload_id: w.id.clone(),
                workload_name: w.name.clone(),
                source_node: self.source_node.clone(),
                target_node: self.target_node.clone(),
                impact: self.impact,
                reason: self.reason.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub moves: Vec<PlannedMove>,
    pub skipped: Vec<SkippedMigration>,
}

impl MigrationPlan {
    pub fn recommendations(&self) -> Vec<MigrationRecommendation> {
        self.moves.iter().flat_map(|m| m.recommendations()).collect()
    }
}

/// Estimated change in blended load when `requirement` lands on or leaves a node
pub fn load_delta(
    weights: &ResourceWeights,
    status: &NodeStatus,
    requirement: &WorkloadRequirement,
) -> f64 {
    fn share(amount: f64, total: f64) -> f64 {
        if total <= 0.0 {
            0.0
        } else {
            amount / total
        }
    }

    let shares = [
        (
            weights.cpu,
            share(requirement.cpu_cores, status.cpu.cores as f64),
        ),
        (
            weights.memory,
            share(requirement.memory_bytes as f64, status.memory.total as f64),
        ),
        (
            weights.disk,
            share(requirement.disk_bytes as f64, status.rootfs.total as f64),
        ),
    ];

    let weight_sum: f64 = shares.iter().map(|(w, _)| w).sum();
    let delta = if weight_sum <= 0.0 {
        shares.iter().map(|(_, s)| s).sum::<f64>() / shares.len() as f64
    } else {
        shares.iter().map(|(w, s)| w * s).sum::<f64>() / weight_sum
    };
    clamp_ratio(delta)
}

/// Estimated effect of moving a unit with `requirement` from `source` to `target`
///
/// Nodes without data in `snapshot` count as idle.
pub fn estimate_impact(
    scorer: &NodeScorer,
    snapshot: &TelemetrySnapshot,
    source: &str,
    target: &str,
    requirement: &WorkloadRequirement,
) -> ImpactEstimate {
    let side = |node: &str| {
        let series = snapshot.node(node);
        let load = series.and_then(|s| scorer.blended_load(s)).unwrap_or(0.0);
        let delta = series
            .and_then(|s| s.latest.as_ref())
            .map(|status| load_delta(scorer.weights(), status, requirement))
            .unwrap_or(0.0);
        (load, delta)
    };
    let (source_before, relief) = side(source);
    let (target_before, added) = side(target);
    ImpactEstimate {
        source_load_before: source_before,
        source_load_after: clamp_ratio(source_before - relief),
        target_load_before: target_before,
        target_load_after: clamp_ratio(target_before + added),
    }
}

struct Candidate {
    workloads: Vec<WorkloadInfo>,
    requirement: WorkloadRequirement,
    relief: f64,
}

struct Target {
    node: String,
    load_before: f64,
    delta: f64,
}

/// Builds the migration plan of a cycle from one telemetry snapshot
pub struct BalancePlanner {
    cluster: Arc<dyn ClusterClient>,
    selector: Arc<NodeSelector>,
    config: Arc<BalancerConfig>,
    history: Arc<MigrationHistory>,
}

impl BalancePlanner {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        selector: Arc<NodeSelector>,
        config: Arc<BalancerConfig>,
        history: Arc<MigrationHistory>,
    ) -> Self {
        Self {
            cluster,
            selector,
            config,
            history,
        }
    }

    /// Plan at most one move per overloaded node, worst node first
    pub async fn plan(
        &self,
        scorer: &NodeScorer,
        snapshot: &TelemetrySnapshot,
        loads: &[NodeLoad],
    ) -> MigrationPlan {
        let mut plan = MigrationPlan::default();
        let mut projected: HashMap<String, f64> = loads
            .iter()
            .filter_map(|l| l.load.map(|load| (l.node.clone(), load)))
            .collect();
        let mut budget = self.config.max_parallel_migrations;

        let mut overloaded: Vec<&NodeLoad> = loads
            .iter()
            .filter(|l| l.class == LoadClass::Overloaded)
            .collect();
        overloaded.sort_by(|a, b| {
            let (a, b) = (a.load.unwrap_or(0.0), b.load.unwrap_or(0.0));
            b.total_cmp(&a)
        });

        for source in overloaded {
            let Some(status) = snapshot.node(&source.node).and_then(|s| s.latest.as_ref()) else {
                continue;
            };
            let workloads = match self.workloads_on(&source.node).await {
                Ok(workloads) => workloads,
                Err(e) => {
                    warn!(node = %source.node, error = %e, "Cannot list workloads of overloaded node");
                    continue;
                }
            };

            let (units, skipped) = self.migratable_units(&workloads);
            plan.skipped.extend(skipped);

            let mut candidates: Vec<Candidate> = units
                .into_iter()
                .map(|workloads| {
                    let mut requirement = WorkloadRequirement::for_workloads(&workloads);
                    requirement.anti_affinity_group = workloads
                        .iter()
                        .find_map(|w| self.config.anti_affinity_group_of(w))
                        .map(str::to_string);
                    let relief = load_delta(scorer.weights(), status, &requirement);
                    Candidate {
                        workloads,
                        requirement,
                        relief,
                    }
                })
                .collect();
            candidates.sort_by(|a, b| b.relief.total_cmp(&a.relief));

            let source_before = projected
                .get(&source.node)
                .copied()
                .or(source.load)
                .unwrap_or(0.0);

            for candidate in candidates {
                if budget == 0 || candidate.workloads.len() > budget {
                    plan.skipped.extend(
                        candidate
                            .workloads
                            .iter()
                            .map(|w| SkippedMigration::new(w, SkipReason::BudgetExhausted)),
                    );
                    if budget == 0 {
                        break;
                    }
                    continue;
                }

                let critical = candidate.workloads.iter().any(|w| self.config.is_critical(w));
                let target = self
                    .select_target(
                        scorer,
                        snapshot,
                        loads,
                        &projected,
                        &source.node,
                        &candidate.requirement,
                        critical,
                    )
                    .await;

                let Some(target) = target else {
                    plan.skipped.extend(
                        candidate
                            .workloads
                            .iter()
                            .map(|w| SkippedMigration::new(w, SkipReason::NoTarget)),
                    );
                    continue;
                };

                let impact = ImpactEstimate {
                    source_load_before: source_before,
                    source_load_after: clamp_ratio(source_before - candidate.relief),
                    target_load_before: target.load_before,
                    target_load_after: clamp_ratio(target.load_before + target.delta),
                };
                projected.insert(source.node.clone(), impact.source_load_after);
                projected.insert(target.node.clone(), impact.target_load_after);
                budget -= candidate.workloads.len();

                let reason = format!(
                    "node {} overloaded (load {:.2} > {:.2})",
                    source.node, source_before, self.config.high_load_threshold
                );
                debug!(
                    source = %source.node,
                    target = %target.node,
                    workloads = candidate.workloads.len(),
                    relief = candidate.relief,
                    "Planned move"
                );
                plan.moves.push(PlannedMove {
                    workloads: candidate.workloads,
                    source_node: source.node.clone(),
                    target_node: target.node,
                    impact,
                    reason,
                });
                break;
            }
        }

        plan
    }

    async fn workloads_on(&self, node: &str) -> anyhow::Result<Vec<WorkloadInfo>> {
        tokio::time::timeout(self.config.node_timeout(), self.cluster.list_workloads(node))
            .await
            .context("listing workloads timed out")?
    }

    /// Split running workloads into movable units, reporting the rest
    fn migratable_units(
        &self,
        workloads: &[WorkloadInfo],
    ) -> (Vec<Vec<WorkloadInfo>>, Vec<SkippedMigration>) {
        let mut units = Vec::new();
        let mut skipped = Vec::new();
        let mut seen_groups = HashSet::new();
        let cooldown = self.config.min_balance_interval();

        for workload in workloads.iter().filter(|w| w.running) {
            if let Some((group, members)) = self.config.group_of_workload(workload) {
                if !seen_groups.insert(group.to_string()) {
                    continue;
                }
                let placed: Vec<&WorkloadInfo> = members
                    .iter()
                    .filter_map(|m| workloads.iter().find(|w| w.matches(m)))
                    .collect();
                let complete = placed.len() == members.len() && placed.iter().all(|w| w.running);
                let any_excluded = placed.iter().any(|w| self.config.is_workload_excluded(w));

                if !complete || any_excluded {
                    debug!(group = %group, "Group cannot move as one unit");
                    skipped.extend(placed.iter().map(|w| {
                        let reason = if self.config.is_workload_excluded(w) {
                            SkipReason::Excluded
                        } else {
                            SkipReason::GroupConstrained
                        };
                        SkippedMigration::new(w, reason)
                    }));
                    continue;
                }
                if placed
                    .iter()
                    .any(|w| self.history.is_cooling_down(&w.id, cooldown))
                {
                    skipped.extend(
                        placed
                            .iter()
                            .map(|w| SkippedMigration::new(w, SkipReason::CoolingDown)),
                    );
                    continue;
                }
                units.push(placed.into_iter().cloned().collect());
                continue;
            }

            if self.config.is_workload_excluded(workload) {
                skipped.push(SkippedMigration::new(workload, SkipReason::Excluded));
            } else if self.history.is_cooling_down(&workload.id, cooldown) {
                skipped.push(SkippedMigration::new(workload, SkipReason::CoolingDown));
            } else {
                units.push(vec![workload.clone()]);
            }
        }

        (units, skipped)
    }

    /// Underloaded nodes first, then any node that is not overloaded
    #[allow(clippy::too_many_arguments)]
    async fn select_target(
        &self,
        scorer: &NodeScorer,
        snapshot: &TelemetrySnapshot,
        loads: &[NodeLoad],
        projected: &HashMap<String, f64>,
        source: &str,
        requirement: &WorkloadRequirement,
        critical: bool,
    ) -> Option<Target> {
        let high = self.config.high_load_threshold;
        let eligible = |l: &&NodeLoad| {
            l.node != source
                && !self.config.is_node_excluded(&l.node)
                && projected.get(&l.node).map_or(false, |p| *p < high)
        };

        let underloaded: Vec<String> = loads
            .iter()
            .filter(|l| l.class == LoadClass::Underloaded)
            .filter(eligible)
            .map(|l| l.node.clone())
            .collect();
        let not_overloaded: Vec<String> = loads
            .iter()
            .filter(|l| matches!(l.class, LoadClass::Underloaded | LoadClass::Balanced))
            .filter(eligible)
            .map(|l| l.node.clone())
            .collect();

        for tier in [underloaded, not_overloaded] {
            if tier.is_empty() {
                continue;
            }
            let ranked = self
                .selector
                .rank(scorer, snapshot, &tier, Some(requirement))
                .await;
            let ranked = if critical {
                self.prefer_ha_hosts(ranked).await
            } else {
                ranked
            };

            for score in ranked {
                let load_before = projected.get(&score.node).copied().unwrap_or(0.0);
                let delta = snapshot
                    .node(&score.node)
                    .and_then(|s| s.latest.as_ref())
                    .map(|status| load_delta(scorer.weights(), status, requirement))
                    .unwrap_or(0.0);
                if load_before + delta >= high {
                    debug!(node = %score.node, "Target would become overloaded");
                    continue;
                }
                return Some(Target {
                    node: score.node,
                    load_before,
                    delta,
                });
            }
        }
        None
    }

    /// Move nodes already hosting HA-managed workloads to the front, keeping order
    async fn prefer_ha_hosts(&self, ranked: Vec<NodeScore>) -> Vec<NodeScore> {
        let mut ha_hosts = Vec::new();
        let mut others = Vec::new();
        for score in ranked {
            let hosts_ha = match self.workloads_on(&score.node).await {
                Ok(workloads) => workloads.iter().any(|w| w.ha_managed),
                Err(_) => false,
            };
            if hosts_ha {
                ha_hosts.push(score);
            } else {
                others.push(score);
            }
        }
        ha_hosts.extend(others);
        ha_hosts
    }
}
