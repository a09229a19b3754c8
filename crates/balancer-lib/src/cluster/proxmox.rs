//! Proxmox VE REST client
//!
//! Thin wrapper over `/api2/json` using a pre-issued API token. Only the
//! endpoints the balancer consumes are implemented.

use super::{async_trait, ClusterClient};
use crate::models::{ByteUsage, CpuStatus, NodeCapacity, NodeInfo, NodeStatus, WorkloadInfo};
use anyhow::{Context, Result};
use dashmap::DashMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// PCI vendor id of NVIDIA
const NVIDIA_VENDOR_ID: &str = "0x10de";

/// PCI class prefix of display controllers
const DISPLAY_CLASS_PREFIX: &str = "0x03";

/// Connection settings for the Proxmox VE API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxConfig {
    /// Base URL, e.g. `https://pve1.example:8006`
    pub url: String,
    /// API token in `USER@REALM!TOKENID=SECRET` form
    pub token: String,
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// Guest flavour; migrations use a different endpoint for each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    fn path(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }

    fn ha_prefix(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "vm",
            GuestKind::Lxc => "ct",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PveNode {
    node: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PveCpuInfo {
    cpus: u32,
}

#[derive(Debug, Deserialize)]
struct PveUsage {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    used: u64,
    #[serde(default)]
    free: u64,
}

impl From<PveUsage> for ByteUsage {
    fn from(u: PveUsage) -> Self {
        ByteUsage {
            total: u.total,
            used: u.used,
            free: u.free,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PveNodeStatus {
    cpu: f64,
    cpuinfo: PveCpuInfo,
    memory: PveUsage,
    rootfs: PveUsage,
}

#[derive(Debug, Deserialize)]
struct PveGuest {
    vmid: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    cpus: Option<f64>,
    #[serde(default)]
    maxmem: Option<u64>,
    #[serde(default)]
    maxdisk: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PveHaResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct PvePciDevice {
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    vendor_name: Option<String>,
    #[serde(default)]
    device_name: Option<String>,
}

impl PvePciDevice {
    /// NVIDIA display controller; other functions of the same card do not count
    fn is_gpu(&self) -> bool {
        let display = self
            .class
            .as_deref()
            .map_or(true, |c| c.starts_with(DISPLAY_CLASS_PREFIX));
        let nvidia = self.vendor.as_deref() == Some(NVIDIA_VENDOR_ID)
            || [&self.vendor_name, &self.device_name]
                .iter()
                .filter_map(|n| n.as_deref())
                .any(|n| n.to_lowercase().contains("nvidia"));
        display && nvidia
    }
}

/// `ClusterClient` backed by the Proxmox VE REST API
pub struct ProxmoxClient {
    client: Client,
    base_url: Url,
    auth_header: String,
    /// Guest kind by vmid, learned from workload listings
    guest_kinds: DashMap<String, GuestKind>,
}

impl ProxmoxClient {
    pub fn new(config: &ProxmoxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(&config.url).context("Invalid Proxmox URL")?;
        base_url.set_path("/api2/json/");

        Ok(Self {
            client,
            base_url,
            auth_header: format!("PVEAPIToken={}", config.token),
            guest_kinds: DashMap::new(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Proxmox API error ({}) for {}: {}", status, path, body);
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response for {}", path))?;
        Ok(envelope.data)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<()> {
        let url = self.base_url.join(path).context("Invalid path")?;
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(url)
            .header("Authorization", &self.auth_header)
            .form(form)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Proxmox API error ({}) for {}: {}", status, path, body);
        }
        Ok(())
    }

    async fn ha_resources(&self) -> HashSet<String> {
        match self.get::<Vec<PveHaResource>>("cluster/ha/resources").await {
            Ok(resources) => resources.into_iter().map(|r| r.sid).collect(),
            Err(e) => {
                debug!(error = %e, "HA resources unavailable, assuming none");
                HashSet::new()
            }
        }
    }

    async fn guests(&self, node: &str, kind: GuestKind) -> Result<Vec<PveGuest>> {
        self.get(&format!("nodes/{}/{}", node, kind.path())).await
    }
}

#[async_trait]
impl ClusterClient for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let nodes: Vec<PveNode> = self.get("nodes").await?;
        Ok(nodes
            .into_iter()
            .map(|n| NodeInfo {
                online: n.status.as_deref() == Some("online"),
                name: n.node,
            })
            .collect())
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatus> {
        let status: PveNodeStatus = self.get(&format!("nodes/{}/status", node)).await?;
        Ok(NodeStatus {
            cpu: CpuStatus {
                cores: status.cpuinfo.cpus,
                usage: status.cpu,
            },
            memory: status.memory.into(),
            rootfs: status.rootfs.into(),
            network: None,
        })
    }

    async fn node_capacity(&self, node: &str) -> Result<NodeCapacity> {
        let status: PveNodeStatus = self.get(&format!("nodes/{}/status", node)).await?;

        let capabilities = match self
            .get::<Vec<PvePciDevice>>(&format!("nodes/{}/hardware/pci", node))
            .await
        {
            Ok(devices) => {
                if devices.iter().any(PvePciDevice::is_gpu) {
                    vec!["gpu".to_string()]
                } else {
                    Vec::new()
                }
            }
            Err(e) => {
                warn!(node = %node, error = %e, "Could not read PCI devices");
                Vec::new()
            }
        };

        Ok(NodeCapacity {
            max_cpu: status.cpuinfo.cpus,
            current_cpu_used: status.cpu * status.cpuinfo.cpus as f64,
            capabilities,
        })
    }

    async fn list_workloads(&self, node: &str) -> Result<Vec<WorkloadInfo>> {
        let ha = self.ha_resources().await;
        let mut workloads = Vec::new();

        for kind in [GuestKind::Qemu, GuestKind::Lxc] {
            for guest in self.guests(node, kind).await? {
                let id = guest.vmid.to_string();
                self.guest_kinds.insert(id.clone(), kind);
                workloads.push(WorkloadInfo {
                    ha_managed: ha.contains(&format!("{}:{}", kind.ha_prefix(), id)),
                    name: guest.name.unwrap_or_else(|| format!("VM-{}", id)),
                    node: node.to_string(),
                    running: guest.status == "running",
                    cpu_cores: guest.cpus.unwrap_or(1.0),
                    memory_bytes: guest.maxmem.unwrap_or(0),
                    disk_bytes: guest.maxdisk.unwrap_or(0),
                    id,
                });
            }
        }

        Ok(workloads)
    }

    async fn migrate(
        &self,
        workload_id: &str,
        source_node: &str,
        target_node: &str,
        online: bool,
    ) -> Result<()> {
        let kind = self
            .guest_kinds
            .get(workload_id)
            .map(|k| *k)
            .unwrap_or(GuestKind::Qemu);
        let path = format!(
            "nodes/{}/{}/{}/migrate",
            source_node,
            kind.path(),
            workload_id
        );

        // Containers cannot live-migrate; they restart on the target instead.
        let mode = match kind {
            GuestKind::Qemu => ("online", if online { "1" } else { "0" }),
            GuestKind::Lxc => ("restart", if online { "1" } else { "0" }),
        };
        self.post_form(&path, &[("target", target_node), mode]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "root@pam!balancer=secret";

    fn client_for(server: &mockito::ServerGuard) -> ProxmoxClient {
        ProxmoxClient::new(&ProxmoxConfig {
            url: server.url(),
            token: TOKEN.to_string(),
            verify_tls: false,
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_nodes_maps_liveness() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api2/json/nodes")
            .match_header("authorization", format!("PVEAPIToken={}", TOKEN).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"node":"pve1","status":"online"},{"node":"pve2","status":"offline"}]}"#)
            .create_async()
            .await;

        let nodes = client_for(&server).list_nodes().await.unwrap();
        mock.assert_async().await;

        assert_eq!(nodes, vec![NodeInfo::online("pve1"), NodeInfo::offline("pve2")]);
    }

    #[tokio::test]
    async fn test_node_status_parsing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api2/json/nodes/pve1/status")
            .with_status(200)
            .with_body(
                r#"{"data":{"cpu":0.25,"cpuinfo":{"cpus":16},
                "memory":{"total":1000,"used":400,"free":600},
                "rootfs":{"total":2000,"used":500,"free":1500,"avail":1400}}}"#,
            )
            .create_async()
            .await;

        let status = client_for(&server).node_status("pve1").await.unwrap();
        assert_eq!(status.cpu.cores, 16);
        let u = status.utilization();
        assert!((u.memory - 0.4).abs() < 1e-9);
        assert!((u.disk - 0.25).abs() < 1e-9);
        assert!(u.network.is_none());
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api2/json/nodes")
            .with_status(401)
            .with_body("authentication failure")
            .create_async()
            .await;

        let err = client_for(&server).list_nodes().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_workloads_include_containers_and_ha_flag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api2/json/cluster/ha/resources")
            .with_status(200)
            .with_body(r#"{"data":[{"sid":"vm:100","state":"started"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api2/json/nodes/pve1/qemu")
            .with_status(200)
            .with_body(r#"{"data":[{"vmid":100,"name":"qdrant","status":"running","cpus":4,"maxmem":8192,"maxdisk":100}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api2/json/nodes/pve1/lxc")
            .with_status(200)
            .with_body(r#"{"data":[{"vmid":200,"status":"stopped"}]}"#)
            .create_async()
            .await;
        let lxc_migrate = server
            .mock("POST", "/api2/json/nodes/pve1/lxc/200/migrate")
            .with_status(200)
            .with_body(r#"{"data":"UPID:pve1:0001"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let workloads = client.list_workloads("pve1").await.unwrap();
        assert_eq!(workloads.len(), 2);
        assert!(workloads[0].ha_managed);
        assert!(workloads[0].running);
        assert_eq!(workloads[0].cpu_cores, 4.0);
        assert_eq!(workloads[1].name, "VM-200");
        assert!(!workloads[1].ha_managed);

        client.migrate("200", "pve1", "pve2", true).await.unwrap();
        lxc_migrate.assert_async().await;
    }

    #[tokio::test]
    async fn test_only_nvidia_display_controllers_count_as_gpu() {
        let mut server = mockito::Server::new_async().await;
        for node in ["pve1", "pve2"] {
            server
                .mock("GET", format!("/api2/json/nodes/{}/status", node).as_str())
                .with_status(200)
                .with_body(
                    r#"{"data":{"cpu":0.5,"cpuinfo":{"cpus":8},
                    "memory":{"total":1000,"used":400,"free":600},
                    "rootfs":{"total":2000,"used":500,"free":1500}}}"#,
                )
                .create_async()
                .await;
        }
        server
            .mock("GET", "/api2/json/nodes/pve1/hardware/pci")
            .with_status(200)
            .with_body(
                r#"{"data":[
                {"class":"0x030000","vendor":"0x8086","vendor_name":"Intel Corporation","device_name":"HD Graphics 630"},
                {"class":"0x040300","vendor":"0x1002","vendor_name":"Advanced Micro Devices, Inc. [AMD]","device_name":"Audio device"}]}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api2/json/nodes/pve2/hardware/pci")
            .with_status(200)
            .with_body(
                r#"{"data":[{"class":"0x030200","vendor":"0x10de","vendor_name":"NVIDIA Corporation","device_name":"GA100 [A100 PCIe 40GB]"}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let plain = client.node_capacity("pve1").await.unwrap();
        assert!(plain.capabilities.is_empty());
        assert!((plain.current_cpu_used - 4.0).abs() < 1e-9);

        let gpu = client.node_capacity("pve2").await.unwrap();
        assert_eq!(gpu.capabilities, vec!["gpu".to_string()]);
    }
}
