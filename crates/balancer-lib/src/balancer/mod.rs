//! Load balancing
//!
//! `LoadBalancer` is the engine's entry point. It owns the telemetry store and
//! the node selector, runs balance cycles, and answers placement queries.
//! `BalanceLoop` drives it on a fixed interval.

mod history;
mod planner;
mod r#loop;


pub use history::{MigrationHistory, MigrationOutcome, MigrationRecord, DEFAULT_QUERY_LIMIT};
pub use planner::{
    classify, estimate_impact, load_delta, BalancePlanner, LoadClass, MigrationPlan, NodeLoad, PlannedMove,
    SkipReason, SkippedMigration,
};
pub use r#loop::{BalanceLoop, BalanceLoopBuilder};

use crate::cluster::ClusterClient;
use crate::config::{BalancerConfig, ResourceWeights};
use crate::error::{BalancerError, Result};
use crate::health::{Component, HealthRegistry};
use crate::models::{MigrationRecommendation, WorkloadInfo, WorkloadRequirement};
use crate::observability::{BalancerMetrics, StructuredLogger};
use crate::scoring::{NodeScorer, NodeSelector};
use crate::telemetry::{RefreshReport, TelemetrySnapshot, TelemetryStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Reason recorded for operator-requested migrations
pub const MANUAL_REASON: &str = "manual";

/// Phase of the balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancerState {
    Idle,
    Checking,
    Planning,
    Migrating,
}

/// What happened to one workload during a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CycleAction {
    Executed {
        recommendation: MigrationRecommendation,
    },
    Failed {
        recommendation: MigrationRecommendation,
        error: String,
    },
    Skipped(SkippedMigration),
}

/// Result of one balance cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub nodes: Vec<NodeLoad>,
    pub actions: Vec<CycleAction>,
    /// Nodes whose telemetry could not be fetched this cycle
    pub telemetry_failures: Vec<String>,
    /// True if a stop request prevented planning or execution
    pub stopped: bool,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn executed(&self) -> Vec<&MigrationRecommendation> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                CycleAction::Executed { recommendation } => Some(recommendation),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<(&MigrationRecommendation, &str)> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                CycleAction::Failed {
                    recommendation,
                    error,
                } => Some((recommendation, error.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> Vec<&SkippedMigration> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                CycleAction::Skipped(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn node(&self, name: &str) -> Option<&NodeLoad> {
        self.nodes.iter().find(|n| n.node == name)
    }
}

/// Migration plan computed without issuing anything
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPreview {
    pub nodes: Vec<NodeLoad>,
    pub recommendations: Vec<MigrationRecommendation>,
    pub skipped: Vec<SkippedMigration>,
}

/// Per-node load classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub state: BalancerState,
    pub high_load_threshold: f64,
    pub low_load_threshold: f64,
    pub weights: ResourceWeights,
    pub nodes: Vec<NodeLoad>,
    pub telemetry_generation: u64,
}

/// Placement and balancing engine
pub struct LoadBalancer {
    cluster: Arc<dyn ClusterClient>,
    config: Arc<BalancerConfig>,
    telemetry: Arc<TelemetryStore>,
    selector: Arc<NodeSelector>,
    planner: BalancePlanner,
    history: Arc<MigrationHistory>,
    state: RwLock<BalancerState>,
    stop_requested: AtomicBool,
    cycle_lock: Mutex<()>,
    health: HealthRegistry,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
}

impl LoadBalancer {
    /// Validate `config` and wire the engine around `cluster`
    pub fn new(cluster: Arc<dyn ClusterClient>, config: BalancerConfig) -> Result<Self> {
        let config = Arc::new(config.validate()?);
        let telemetry = Arc::new(TelemetryStore::new(
            Arc::clone(&cluster),
            config.history_window,
            config.node_timeout(),
        ));
        let selector = Arc::new(NodeSelector::new(
            Arc::clone(&cluster),
            Arc::clone(&telemetry),
            Arc::clone(&config),
        ));
        let history = Arc::new(MigrationHistory::new(config.migration_history_limit));
        let planner = BalancePlanner::new(
            Arc::clone(&cluster),
            Arc::clone(&selector),
            Arc::clone(&config),
            Arc::clone(&history),
        );

        Ok(Self {
            cluster,
            config,
            telemetry,
            selector,
            planner,
            history,
            state: RwLock::new(BalancerState::Idle),
            stop_requested: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
            health: HealthRegistry::new(),
            metrics: BalancerMetrics::new(),
            logger: StructuredLogger::new("default"),
        })
    }

    /// Report component health into a shared registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub async fn state(&self) -> BalancerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: BalancerState) {
        *self.state.write().await = state;
    }

    /// Best node for a new workload, or `None` if nothing qualifies
    pub async fn select_best_node(
        &self,
        requirement: Option<&WorkloadRequirement>,
        excluded: &[String],
    ) -> Result<Option<String>> {
        self.selector.select_best_node(requirement, excluded).await
    }

    /// Up to `count` eligible nodes, best first
    pub async fn recommend_nodes(
        &self,
        count: usize,
        requirement: Option<&WorkloadRequirement>,
    ) -> Result<Vec<String>> {
        self.selector.recommend_nodes(count, requirement).await
    }

    /// Replace the resource weights from the next operation on
    pub async fn set_weights(&self, weights: ResourceWeights) -> Result<ResourceWeights> {
        self.selector.set_weights(weights).await
    }

    pub async fn weights(&self) -> ResourceWeights {
        self.selector.weights().await
    }

    pub async fn migration_history(
        &self,
        limit: Option<usize>,
        workload_id: Option<&str>,
    ) -> Vec<MigrationRecord> {
        self.history.query(limit, workload_id).await
    }

    /// Stop planning new work; migrations already issued are not interrupted
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Refresh telemetry, classify nodes, plan and issue migrations
    ///
    /// Fails only when the cluster cannot list its nodes.
    pub async fn run_balance_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;
        let start = Instant::now();
        let mut report = CycleReport::default();

        if self.is_stop_requested() {
            report.stopped = true;
            return Ok(report);
        }

        self.set_state(BalancerState::Checking).await;
        let scorer = self.selector.scorer().await;

        let refresh = match self.telemetry.refresh().await {
            Ok(refresh) => refresh,
            Err(e) => {
                self.set_state(BalancerState::Idle).await;
                self.metrics.inc_cycle_failures();
                self.health
                    .set_unhealthy(Component::Cluster, e.to_string())
                    .await;
                self.logger.log_cycle_failed(&e.to_string());
                return Err(e);
            }
        };
        self.record_refresh(&refresh).await;

        let snapshot = self.telemetry.snapshot().await;
        report.telemetry_failures = refresh
            .failed_nodes()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut nodes: Vec<String> = refresh
            .sampled
            .iter()
            .cloned()
            .chain(report.telemetry_failures.iter().cloned())
            .collect();
        nodes.sort();
        report.nodes = self.classify_nodes(&scorer, &snapshot, &nodes);

        if self.is_stop_requested() {
            info!("Stop requested, skipping planning");
            report.stopped = true;
            self.set_state(BalancerState::Idle).await;
            return Ok(report);
        }

        self.set_state(BalancerState::Planning).await;
        let plan = self.planner.plan(&scorer, &snapshot, &report.nodes).await;

        self.set_state(BalancerState::Migrating).await;
        for skipped in plan.skipped {
            self.note_skipped(&skipped);
            report.actions.push(CycleAction::Skipped(skipped));
        }
        for planned in &plan.moves {
            for recommendation in planned.recommendations() {
                if self.is_stop_requested() {
                    report.stopped = true;
                    let skipped = SkippedMigration {
                        workload_id: recommendation.workload_id,
                        source_node: recommendation.source_node,
                        reason: SkipReason::StopRequested,
                    };
                    self.note_skipped(&skipped);
                    report.actions.push(CycleAction::Skipped(skipped));
                    continue;
                }
                let action = match self.issue(&recommendation, true).await {
                    Ok(()) => CycleAction::Executed { recommendation },
                    Err(e) => CycleAction::Failed {
                        recommendation,
                        error: e.to_string(),
                    },
                };
                report.actions.push(action);
            }
        }

        self.set_state(BalancerState::Idle).await;
        self.health.set_healthy(Component::Balancer).await;

        let elapsed = start.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;
        self.metrics.observe_cycle_latency(elapsed.as_secs_f64());
        self.logger.log_cycle_completed(
            report.nodes.len(),
            report.executed().len(),
            report.failed().len(),
            report.skipped().len(),
            report.elapsed_ms,
        );
        Ok(report)
    }

    /// Plan a cycle on current telemetry without issuing or recording anything
    pub async fn recommend_migrations(&self) -> Result<MigrationPreview> {
        let (scorer, snapshot, nodes) = self.current_view().await?;
        let loads = classify(
            &scorer,
            &snapshot,
            &nodes,
            self.config.high_load_threshold,
            self.config.low_load_threshold,
        );
        let plan = self.planner.plan(&scorer, &snapshot, &loads).await;
        Ok(MigrationPreview {
            nodes: loads,
            recommendations: plan.recommendations(),
            skipped: plan.skipped,
        })
    }

    /// Classification of every online node on current telemetry
    pub async fn cluster_status(&self) -> Result<ClusterStatus> {
        let (scorer, snapshot, nodes) = self.current_view().await?;
        let loads = classify(
            &scorer,
            &snapshot,
            &nodes,
            self.config.high_load_threshold,
            self.config.low_load_threshold,
        );
        Ok(ClusterStatus {
            state: self.state().await,
            high_load_threshold: self.config.high_load_threshold,
            low_load_threshold: self.config.low_load_threshold,
            weights: *scorer.weights(),
            nodes: loads,
            telemetry_generation: snapshot.generation,
        })
    }

    async fn current_view(&self) -> Result<(NodeScorer, TelemetrySnapshot, Vec<String>)> {
        self.selector.ensure_telemetry().await;
        let nodes = self
            .cluster
            .list_nodes()
            .await
            .map_err(|e| BalancerError::ClusterUnavailable(format!("{:#}", e)))?;
        let online = nodes
            .into_iter()
            .filter(|n| n.online)
            .map(|n| n.name)
            .collect();
        let scorer = self.selector.scorer().await;
        let snapshot = self.telemetry.snapshot().await;
        Ok((scorer, snapshot, online))
    }

    fn classify_nodes(
        &self,
        scorer: &NodeScorer,
        snapshot: &TelemetrySnapshot,
        nodes: &[String],
    ) -> Vec<NodeLoad> {
        let loads = classify(
            scorer,
            snapshot,
            nodes,
            self.config.high_load_threshold,
            self.config.low_load_threshold,
        );

        let mut overloaded = 0;
        let mut underloaded = 0;
        for load in &loads {
            match (load.class, load.load) {
                (LoadClass::Overloaded, Some(l)) => {
                    overloaded += 1;
                    self.logger.log_node_classified(&load.node, l, load.class.as_str());
                }
                (LoadClass::Underloaded, Some(l)) => {
                    underloaded += 1;
                    self.logger.log_node_classified(&load.node, l, load.class.as_str());
                }
                _ => debug!(node = %load.node, class = %load.class, "Node classified"),
            }
        }
        self.metrics
            .set_node_counts(loads.len() as i64, overloaded, underloaded);
        loads
    }

    async fn record_refresh(&self, refresh: &RefreshReport) {
        self.metrics
            .observe_telemetry_refresh(refresh.elapsed.as_secs_f64());
        self.health.set_healthy(Component::Cluster).await;

        if refresh.failed.is_empty() {
            self.health.set_healthy(Component::Telemetry).await;
        } else {
            self.metrics.add_telemetry_errors(refresh.failed.len() as u64);
            self.health
                .set_degraded(
                    Component::Telemetry,
                    format!("unreachable nodes: {}", refresh.failed_nodes().join(", ")),
                )
                .await;
        }
    }

    fn note_skipped(&self, skipped: &SkippedMigration) {
        self.metrics.inc_migrations_skipped(skipped.reason.as_str());
        self.logger.log_migration_skipped(
            &skipped.workload_id,
            &skipped.source_node,
            skipped.reason.as_str(),
        );
    }

    /// Migrate one workload on operator request
    ///
    /// Excluded workloads and excluded target nodes are refused. The migration
    /// is recorded with reason `manual` and starts the workload's cooldown.
    pub async fn migrate_workload(
        &self,
        workload_id: &str,
        source_node: &str,
        target_node: &str,
        online: bool,
    ) -> Result<MigrationRecommendation> {
        if source_node == target_node {
            return Err(BalancerError::MigrationRejected(format!(
                "{} is already on {}",
                workload_id, target_node
            )));
        }
        if self.config.is_node_excluded(target_node) {
            return Err(BalancerError::MigrationRejected(format!(
                "target node {} is excluded",
                target_node
            )));
        }

        let workload = self.find_workload(workload_id, source_node).await?;
        if self.config.is_workload_excluded(&workload) {
            return Err(BalancerError::MigrationRejected(format!(
                "workload {} is excluded from migration",
                workload_id
            )));
        }

        let _guard = self.cycle_lock.lock().await;
        self.selector.ensure_telemetry().await;
        let scorer = self.selector.scorer().await;
        let snapshot = self.telemetry.snapshot().await;
        let requirement = WorkloadRequirement::for_workloads([&workload]);

        let recommendation = MigrationRecommendation {
            workload_id: workload.id.clone(),
            workload_name: workload.name.clone(),
            source_node: source_node.to_string(),
            target_node: target_node.to_string(),
            impact: estimate_impact(&scorer, &snapshot, source_node, target_node, &requirement),
            reason: MANUAL_REASON.to_string(),
        };
        info!(
            workload_id = %recommendation.workload_id,
            source = %source_node,
            target = %target_node,
            online = online,
            "Manual migration requested"
        );
        self.issue(&recommendation, online).await?;
        Ok(recommendation)
    }

    async fn find_workload(&self, workload_id: &str, node: &str) -> Result<WorkloadInfo> {
        let listed = tokio::time::timeout(
            self.config.node_timeout(),
            self.cluster.list_workloads(node),
        )
        .await;
        let workloads = match listed {
            Ok(Ok(workloads)) => workloads,
            Ok(Err(e)) => {
                warn!(node = %node, error = %e, "Failed to list workloads");
                return Err(BalancerError::TelemetryUnavailable {
                    node: node.to_string(),
                    reason: format!("{:#}", e),
                });
            }
            Err(_) => {
                return Err(BalancerError::TelemetryUnavailable {
                    node: node.to_string(),
                    reason: format!(
                        "listing workloads timed out after {:?}",
                        self.config.node_timeout()
                    ),
                });
            }
        };
        workloads
            .into_iter()
            .find(|w| w.matches(workload_id))
            .ok_or_else(|| BalancerError::WorkloadNotFound {
                workload_id: workload_id.to_string(),
                node: node.to_string(),
            })
    }

    /// Issue one migration and record its outcome
    async fn issue(&self, rec: &MigrationRecommendation, online: bool) -> Result<()> {
        let timeout = self.config.migration_timeout();
        let outcome = match tokio::time::timeout(
            timeout,
            self.cluster
                .migrate(&rec.workload_id, &rec.source_node, &rec.target_node, online),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!("timed out after {:?}", timeout)),
        };

        let (status, error) = match &outcome {
            Ok(()) => (MigrationOutcome::Initiated, None),
            Err(reason) => (MigrationOutcome::Failed, Some(reason.clone())),
        };
        self.history
            .record(MigrationRecord {
                workload_id: rec.workload_id.clone(),
                workload_name: rec.workload_name.clone(),
                source_node: rec.source_node.clone(),
                target_node: rec.target_node.clone(),
                reason: rec.reason.clone(),
                outcome: status,
                error,
                timestamp: chrono::Utc::now().timestamp(),
            })
            .await;

        match outcome {
            Ok(()) => {
                self.metrics.inc_migrations_issued();
                self.logger.log_migration_issued(rec);
                Ok(())
            }
            Err(reason) => {
                self.metrics.inc_migrations_failed();
                self.logger.log_migration_failed(rec, &reason);
                Err(BalancerError::MigrationFailed {
                    workload_id: rec.workload_id.clone(),
                    source_node: rec.source_node.clone(),
                    target_node: rec.target_node.clone(),
                    reason,
                })
            }
        }
    }
}
