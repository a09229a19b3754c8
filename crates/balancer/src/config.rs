//! Daemon configuration
//!
//! Layered with the `config` crate: an optional file, then environment
//! variables prefixed `BALANCER_` with `__` between nested keys, e.g.
//! `BALANCER_PROXMOX__URL` or `BALANCER_BALANCING__HIGH_LOAD_THRESHOLD`.

use anyhow::{Context, Result};
use balancer_lib::{BalancerConfig, ProxmoxConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file used when neither `--config` nor `BALANCER_CONFIG_FILE` is set
pub const DEFAULT_CONFIG_FILE: &str = "balancer.toml";

/// Keys read from the environment as comma-separated lists
const LIST_KEYS: &[&str] = &[
    "balancing.vm_exclusions",
    "balancing.node_exclusions",
    "balancing.critical_vms",
];

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Port of the health, metrics and control API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Label attached to every structured event
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    pub proxmox: ProxmoxConfig,

    #[serde(default)]
    pub balancing: BalancerConfig,
}

fn default_api_port() -> u16 {
    8080
}

fn default_cluster_name() -> String {
    "pve".to_string()
}

impl DaemonConfig {
    /// Load from `path` (or the default file, if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut env = config::Environment::with_prefix("BALANCER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            env = env.with_list_parse_key(key);
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(false))
            .add_source(env)
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid configuration (file: {})", path.display()))
    }
}
