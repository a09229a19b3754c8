//! Core data models for the workload balancer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource dimensions tracked per node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cpu,
        ResourceKind::Memory,
        ResourceKind::Disk,
        ResourceKind::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
            ResourceKind::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node as listed by the cluster controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub online: bool,
}

impl NodeInfo {
    pub fn online(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: true,
        }
    }

    pub fn offline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: false,
        }
    }
}

/// CPU section of a node status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStatus {
    pub cores: u32,
    /// Utilization ratio across all cores (0.0 to 1.0)
    pub usage: f64,
}

/// Byte counters for memory or the root filesystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByteUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl ByteUsage {
    /// Used ratio, 0 when the total is unknown
    pub fn used_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        clamp_ratio(self.used as f64 / self.total as f64)
    }
}

/// Live status of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub cpu: CpuStatus,
    pub memory: ByteUsage,
    pub rootfs: ByteUsage,
    /// Network utilization ratio, when the controller reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<f64>,
}

impl NodeStatus {
    /// Current utilization snapshot with every ratio clamped to [0, 1]
    pub fn utilization(&self) -> NodeUtilization {
        NodeUtilization {
            cpu: clamp_ratio(self.cpu.usage),
            memory: self.memory.used_ratio(),
            disk: self.rootfs.used_ratio(),
            network: self.network.map(clamp_ratio),
        }
    }
}

/// Utilization ratios of a node at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeUtilization {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: Option<f64>,
}

impl NodeUtilization {
    pub fn get(&self, kind: ResourceKind) -> Option<f64> {
        match kind {
            ResourceKind::Cpu => Some(self.cpu),
            ResourceKind::Memory => Some(self.memory),
            ResourceKind::Disk => Some(self.disk),
            ResourceKind::Network => self.network,
        }
    }
}

/// CPU capacity and hardware capabilities of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub max_cpu: u32,
    /// Cores currently consumed
    pub current_cpu_used: f64,
    /// Hardware capability tags such as "gpu"
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl NodeCapacity {
    pub fn free_cores(&self) -> f64 {
        (self.max_cpu as f64 - self.current_cpu_used).max(0.0)
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(tag))
    }
}

/// A VM or container running on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub id: String,
    pub name: String,
    pub node: String,
    pub running: bool,
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    /// Managed by the cluster's high-availability stack
    #[serde(default)]
    pub ha_managed: bool,
}

impl WorkloadInfo {
    /// True if `key` names this workload by id or by name
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }
}

/// Resources a workload needs on its target node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRequirement {
    #[serde(default)]
    pub cpu_cores: f64,
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub disk_bytes: u64,
    /// Hardware capability the node must provide (e.g. "gpu")
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub affinity_group: Option<String>,
    #[serde(default)]
    pub anti_affinity_group: Option<String>,
}

impl WorkloadRequirement {
    pub fn new(cpu_cores: f64, memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            cpu_cores,
            memory_bytes,
            disk_bytes,
            ..Default::default()
        }
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capability = Some(tag.into());
        self
    }

    pub fn with_affinity_group(mut self, group: impl Into<String>) -> Self {
        self.affinity_group = Some(group.into());
        self
    }

    pub fn with_anti_affinity_group(mut self, group: impl Into<String>) -> Self {
        self.anti_affinity_group = Some(group.into());
        self
    }

    /// Combined requirement of a set of workloads moved as one unit
    pub fn for_workloads<'a>(workloads: impl IntoIterator<Item = &'a WorkloadInfo>) -> Self {
        workloads
            .into_iter()
            .fold(Self::default(), |mut acc, w| {
                acc.cpu_cores += w.cpu_cores;
                acc.memory_bytes += w.memory_bytes;
                acc.disk_bytes += w.disk_bytes;
                acc
            })
    }
}

/// Estimated effect of a migration on the blended load of both nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactEstimate {
    pub source_load_before: f64,
    pub source_load_after: f64,
    pub target_load_before: f64,
    pub target_load_after: f64,
}

impl ImpactEstimate {
    /// Load removed from the source node
    pub fn relief(&self) -> f64 {
        self.source_load_before - self.source_load_after
    }
}

/// A planned workload move produced by a balance cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecommendation {
    pub workload_id: String,
    pub workload_name: String,
    pub source_node: String,
    pub target_node: String,
    pub impact: ImpactEstimate,
    pub reason: String,
}

/// Clamp a utilization ratio to [0, 1], mapping NaN to 0
pub fn clamp_ratio(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
