//! In-memory cluster used by engine tests

use super::{async_trait, ClusterClient};
use crate::models::{ByteUsage, CpuStatus, NodeCapacity, NodeInfo, NodeStatus, WorkloadInfo};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MockNode {
    pub info: NodeInfo,
    pub status: NodeStatus,
    pub capacity: NodeCapacity,
}

impl MockNode {
    /// Node with 16 cores, 64 GiB memory and 1 TiB disk at the given ratios
    pub fn new(name: &str, cpu: f64, memory: f64, disk: f64) -> Self {
        let mem_total = 64 * GIB;
        let disk_total = 1024 * GIB;
        let mem_used = (mem_total as f64 * memory) as u64;
        let disk_used = (disk_total as f64 * disk) as u64;
        Self {
            info: NodeInfo::online(name),
            status: NodeStatus {
                cpu: CpuStatus {
                    cores: 16,
                    usage: cpu,
                },
                memory: ByteUsage {
                    total: mem_total,
                    used: mem_used,
                    free: mem_total - mem_used,
                },
                rootfs: ByteUsage {
                    total: disk_total,
                    used: disk_used,
                    free: disk_total - disk_used,
                },
                network: None,
            },
            capacity: NodeCapacity {
                max_cpu: 16,
                current_cpu_used: 16.0 * cpu,
                capabilities: Vec::new(),
            },
        }
    }

    pub fn offline(mut self) -> Self {
        self.info.online = false;
        self
    }

    pub fn with_capability(mut self, tag: &str) -> Self {
        self.capacity.capabilities.push(tag.to_string());
        self
    }

    pub fn with_network(mut self, ratio: f64) -> Self {
        self.status.network = Some(ratio);
        self
    }
}

pub fn workload(id: &str, node: &str, cpu_cores: f64, memory_gib: u64) -> WorkloadInfo {
    WorkloadInfo {
        id: id.to_string(),
        name: format!("svc-{}", id),
        node: node.to_string(),
        running: true,
        cpu_cores,
        memory_bytes: memory_gib * GIB,
        disk_bytes: 10 * GIB,
        ha_managed: false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedMigration {
    pub workload_id: String,
    pub source_node: String,
    pub target_node: String,
    pub online: bool,
}

/// Scriptable `ClusterClient`
#[derive(Default)]
pub struct MockCluster {
    nodes: Mutex<Vec<MockNode>>,
    workloads: Mutex<Vec<WorkloadInfo>>,
    failing_nodes: Mutex<HashSet<String>>,
    slow_nodes: Mutex<HashMap<String, Duration>>,
    slow_listings: Mutex<HashMap<String, Duration>>,
    failing_migrations: Mutex<HashSet<String>>,
    unavailable: Mutex<bool>,
    pub migrations: Mutex<Vec<IssuedMigration>>,
    pub status_calls: AtomicUsize,
}

impl MockCluster {
    pub fn new(nodes: Vec<MockNode>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            ..Default::default()
        }
    }

    pub fn with_workloads(self, workloads: Vec<WorkloadInfo>) -> Self {
        *self.workloads.lock().unwrap() = workloads;
        self
    }

    pub fn set_usage(&self, name: &str, cpu: f64, memory: f64, disk: f64) {
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(node) = nodes.iter_mut().find(|n| n.info.name == name) {
            let online = node.info.online;
            let caps = node.capacity.capabilities.clone();
            *node = MockNode::new(name, cpu, memory, disk);
            node.info.online = online;
            node.capacity.capabilities = caps;
        }
    }

    pub fn fail_node(&self, name: &str) {
        self.failing_nodes.lock().unwrap().insert(name.to_string());
    }

    pub fn recover_node(&self, name: &str) {
        self.failing_nodes.lock().unwrap().remove(name);
    }

    /// Delay only the workload listing of `name`
    pub fn slow_listing(&self, name: &str, delay: Duration) {
        self.slow_listings
            .lock()
            .unwrap()
            .insert(name.to_string(), delay);
    }

    pub fn slow_node(&self, name: &str, delay: Duration) {
        self.slow_nodes
            .lock()
            .unwrap()
            .insert(name.to_string(), delay);
    }

    pub fn fail_migration(&self, workload_id: &str) {
        self.failing_migrations
            .lock()
            .unwrap()
            .insert(workload_id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn issued(&self) -> Vec<IssuedMigration> {
        self.migrations.lock().unwrap().clone()
    }

    fn node(&self, name: &str) -> Result<MockNode> {
        if self.failing_nodes.lock().unwrap().contains(name) {
            anyhow::bail!("node {} unreachable", name);
        }
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.info.name == name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown node {}", name))
    }

    async fn delay_for(&self, name: &str) {
        let delay = self.slow_nodes.lock().unwrap().get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        if *self.unavailable.lock().unwrap() {
            anyhow::bail!("connection refused");
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.info.clone())
            .collect())
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.delay_for(node).await;
        Ok(self.node(node)?.status)
    }

    async fn node_capacity(&self, node: &str) -> Result<NodeCapacity> {
        self.delay_for(node).await;
        Ok(self.node(node)?.capacity)
    }

    async fn list_workloads(&self, node: &str) -> Result<Vec<WorkloadInfo>> {
        let delay = self.slow_listings.lock().unwrap().get(node).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.node == node)
            .cloned()
            .collect())
    }

    async fn migrate(
        &self,
        workload_id: &str,
        source_node: &str,
        target_node: &str,
        online: bool,
    ) -> Result<()> {
        if self.failing_migrations.lock().unwrap().contains(workload_id) {
            anyhow::bail!("migration of {} rejected by controller", workload_id);
        }
        self.migrations.lock().unwrap().push(IssuedMigration {
            workload_id: workload_id.to_string(),
            source_node: source_node.to_string(),
            target_node: target_node.to_string(),
            online,
        });
        let mut workloads = self.workloads.lock().unwrap();
        if let Some(w) = workloads.iter_mut().find(|w| w.id == workload_id) {
            w.node = target_node.to_string();
        }
        Ok(())
    }
}
