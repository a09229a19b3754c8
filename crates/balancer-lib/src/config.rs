//! Balancer configuration
//!
//! Values only; loading from files or the environment is the daemon's job.
//! `BalancerConfig::validate` is the single place where thresholds are checked
//! and resource weights are normalized.

use crate::error::{BalancerError, Result};
use crate::models::{ResourceKind, WorkloadInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Tolerance used when checking that weights sum to 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Relative importance of each resource in the composite node score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceWeights {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub disk: f64,
    #[serde(default)]
    pub network: f64,
}

impl Default for ResourceWeights {
    fn default() -> Self {
        Self {
            cpu: 0.4,
            memory: 0.4,
            disk: 0.1,
            network: 0.1,
        }
    }
}

impl ResourceWeights {
    pub fn new(cpu: f64, memory: f64, disk: f64, network: f64) -> Self {
        Self {
            cpu,
            memory,
            disk,
            network,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
            ResourceKind::Disk => self.disk,
            ResourceKind::Network => self.network,
        }
    }

    pub fn sum(&self) -> f64 {
        self.cpu + self.memory + self.disk + self.network
    }

    /// Scale the weights so they sum to 1.0, preserving proportions
    ///
    /// Returns the normalized weights and whether any scaling was needed.
    pub fn normalized(self) -> Result<(Self, bool)> {
        let all = [self.cpu, self.memory, self.disk, self.network];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(BalancerError::Configuration(format!(
                "resource weights must be finite and non-negative: {:?}",
                self
            )));
        }

        let total = self.sum();
        if total <= 0.0 {
            return Err(BalancerError::Configuration(
                "resource weights must have a positive sum".to_string(),
            ));
        }

        if (total - 1.0).abs() <= WEIGHT_SUM_TOLERANCE {
            return Ok((self, false));
        }

        Ok((
            Self {
                cpu: self.cpu / total,
                memory: self.memory / total,
                disk: self.disk / total,
                network: self.network / total,
            },
            true,
        ))
    }

    /// Normalize, logging a warning when the configured weights were off
    pub fn normalized_with_warning(self) -> Result<Self> {
        let (weights, adjusted) = self.normalized()?;
        if adjusted {
            warn!(
                event = "weights_normalized",
                configured_sum = self.sum(),
                cpu = weights.cpu,
                memory = weights.memory,
                disk = weights.disk,
                network = weights.network,
                "Resource weights do not sum to 1.0, normalizing"
            );
        }
        Ok(weights)
    }
}

/// Tunable constants of the node scorer
///
/// The defaults are heuristics, not derived from any physical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringParams {
    /// Share of the current sample in the blended utilization
    #[serde(default = "default_current_weight")]
    pub current_weight: f64,
    /// Share of the predicted value in the blended utilization
    #[serde(default = "default_predicted_weight")]
    pub predicted_weight: f64,
    /// Steps past the last sample to extrapolate
    #[serde(default = "default_prediction_horizon")]
    pub prediction_horizon: usize,
    /// Multiplier applied to the mean CPU/memory standard deviation
    #[serde(default = "default_variability_factor")]
    pub variability_factor: f64,
    /// Number of most recent samples used for the standard deviation
    #[serde(default = "default_variability_window")]
    pub variability_window: usize,
}

fn default_current_weight() -> f64 {
    0.7
}

fn default_predicted_weight() -> f64 {
    0.3
}

fn default_prediction_horizon() -> usize {
    1
}

fn default_variability_factor() -> f64 {
    0.1
}

fn default_variability_window() -> usize {
    5
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            current_weight: default_current_weight(),
            predicted_weight: default_predicted_weight(),
            prediction_horizon: default_prediction_horizon(),
            variability_factor: default_variability_factor(),
            variability_window: default_variability_window(),
        }
    }
}

/// Configuration of the placement engine and the balance loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Seconds between balance cycles
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Blended load above which a node is overloaded
    #[serde(default = "default_high_load_threshold")]
    pub high_load_threshold: f64,

    /// Blended load below which a node is underloaded
    #[serde(default = "default_low_load_threshold")]
    pub low_load_threshold: f64,

    #[serde(default)]
    pub resource_weights: ResourceWeights,

    /// Workload ids or names never migrated
    #[serde(default)]
    pub vm_exclusions: Vec<String>,

    /// Nodes never used as migration targets
    #[serde(default)]
    pub node_exclusions: Vec<String>,

    /// Affinity groups: members move together or not at all
    #[serde(default)]
    pub vm_groups: HashMap<String, Vec<String>>,

    /// Anti-affinity groups: members are kept on separate nodes
    #[serde(default)]
    pub anti_affinity_groups: HashMap<String, Vec<String>>,

    /// Workloads handled as HA-critical in addition to HA-managed ones
    #[serde(default)]
    pub critical_vms: Vec<String>,

    /// Minimum seconds between two migrations of the same workload
    #[serde(default = "default_min_balance_interval")]
    pub min_balance_interval_secs: u64,

    /// Maximum migrations issued per cycle
    #[serde(default = "default_max_parallel_migrations")]
    pub max_parallel_migrations: usize,

    /// Samples retained per node and resource
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Per-node timeout for telemetry requests
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    /// Timeout for issuing one migration
    #[serde(default = "default_migration_timeout")]
    pub migration_timeout_secs: u64,

    /// Entries kept in the migration history
    #[serde(default = "default_migration_history_limit")]
    pub migration_history_limit: usize,

    #[serde(default)]
    pub scoring: ScoringParams,
}

fn default_check_interval() -> u64 {
    300
}

fn default_high_load_threshold() -> f64 {
    0.8
}

fn default_low_load_threshold() -> f64 {
    0.3
}

fn default_min_balance_interval() -> u64 {
    3600
}

fn default_max_parallel_migrations() -> usize {
    2
}

fn default_history_window() -> usize {
    20
}

fn default_node_timeout() -> u64 {
    10
}

fn default_migration_timeout() -> u64 {
    30
}

fn default_migration_history_limit() -> usize {
    100
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            high_load_threshold: default_high_load_threshold(),
            low_load_threshold: default_low_load_threshold(),
            resource_weights: ResourceWeights::default(),
            vm_exclusions: Vec::new(),
            node_exclusions: Vec::new(),
            vm_groups: HashMap::new(),
            anti_affinity_groups: HashMap::new(),
            critical_vms: Vec::new(),
            min_balance_interval_secs: default_min_balance_interval(),
            max_parallel_migrations: default_max_parallel_migrations(),
            history_window: default_history_window(),
            node_timeout_secs: default_node_timeout(),
            migration_timeout_secs: default_migration_timeout(),
            migration_history_limit: default_migration_history_limit(),
            scoring: ScoringParams::default(),
        }
    }
}

impl BalancerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.migration_timeout_secs)
    }

    pub fn min_balance_interval(&self) -> Duration {
        Duration::from_secs(self.min_balance_interval_secs)
    }

    /// Check invariants and normalize weights
    pub fn validate(mut self) -> Result<Self> {
        let (low, high) = (self.low_load_threshold, self.high_load_threshold);
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(BalancerError::Configuration(format!(
                "load thresholds must satisfy 0 <= low < high <= 1 (low={}, high={})",
                low, high
            )));
        }

        if self.history_window < 2 {
            return Err(BalancerError::Configuration(format!(
                "history_window must be at least 2, got {}",
                self.history_window
            )));
        }

        if self.check_interval_secs == 0 {
            return Err(BalancerError::Configuration(
                "check_interval_secs must be positive".to_string(),
            ));
        }

        let blend = self.scoring.current_weight + self.scoring.predicted_weight;
        if self.scoring.current_weight < 0.0 || self.scoring.predicted_weight < 0.0 || blend <= 0.0
        {
            return Err(BalancerError::Configuration(
                "scoring current/predicted weights must be non-negative with a positive sum"
                    .to_string(),
            ));
        }
        self.scoring.current_weight /= blend;
        self.scoring.predicted_weight /= blend;

        if self.scoring.variability_factor < 0.0 {
            return Err(BalancerError::Configuration(
                "scoring variability_factor must be non-negative".to_string(),
            ));
        }

        self.resource_weights = self.resource_weights.normalized_with_warning()?;
        Ok(self)
    }

    /// Affinity group containing the given workload, if any
    pub fn group_of(&self, workload_id: &str) -> Option<(&str, &[String])> {
        self.vm_groups
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == workload_id))
            .map(|(name, members)| (name.as_str(), members.as_slice()))
    }

    /// Affinity group of a workload, matched by id first, then by name
    pub fn group_of_workload(&self, workload: &WorkloadInfo) -> Option<(&str, &[String])> {
        self.group_of(&workload.id)
            .or_else(|| self.group_of(&workload.name))
    }

    /// First anti-affinity group listing the workload by id or name
    pub fn anti_affinity_group_of(&self, workload: &WorkloadInfo) -> Option<&str> {
        self.anti_affinity_groups
            .iter()
            .find(|(_, members)| members.iter().any(|m| workload.matches(m)))
            .map(|(name, _)| name.as_str())
    }

    pub fn is_node_excluded(&self, node: &str) -> bool {
        self.node_exclusions.iter().any(|n| n == node)
    }

    pub fn is_workload_excluded(&self, workload: &WorkloadInfo) -> bool {
        self.vm_exclusions.iter().any(|e| workload.matches(e))
    }

    /// HA-managed, or listed in `critical_vms`
    pub fn is_critical(&self, workload: &WorkloadInfo) -> bool {
        workload.ha_managed || self.critical_vms.iter().any(|c| workload.matches(c))
    }
}
