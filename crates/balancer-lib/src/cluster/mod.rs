//! Cluster controller access
//!
//! The engine never talks to the hypervisor directly. Everything it needs is
//! behind `ClusterClient`, implemented for Proxmox VE by `ProxmoxClient`.

mod proxmox;

#[cfg(test)]
pub(crate) mod mock;

pub use proxmox::{ProxmoxClient, ProxmoxConfig};

use crate::models::{NodeCapacity, NodeInfo, NodeStatus, WorkloadInfo};
use anyhow::Result;

pub use async_trait::async_trait;

/// Operations the engine consumes from the cluster controller
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every node with its liveness
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Current CPU, memory and root filesystem usage of a node
    async fn node_status(&self, node: &str) -> Result<NodeStatus>;

    /// CPU capacity and hardware capabilities of a node
    async fn node_capacity(&self, node: &str) -> Result<NodeCapacity>;

    /// Workloads (VMs and containers) hosted on a node
    async fn list_workloads(&self, node: &str) -> Result<Vec<WorkloadInfo>>;

    /// Start a migration; returns once the controller accepted it
    async fn migrate(
        &self,
        workload_id: &str,
        source_node: &str,
        target_node: &str,
        online: bool,
    ) -> Result<()>;
}
