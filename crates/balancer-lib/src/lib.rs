//! Placement and load-balancing engine for Proxmox VE clusters
//!
//! This crate provides:
//! - Bounded per-node utilization history fed from the cluster controller
//! - Linear trend prediction and node scoring
//! - Node selection for new workloads
//! - A periodic balance loop that migrates workloads off overloaded nodes
//! - Health checks and observability

pub mod balancer;
pub mod cluster;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod scoring;
pub mod telemetry;

pub use balancer::{
    BalanceLoop, BalanceLoopBuilder, BalancerState, ClusterStatus, CycleAction, CycleReport,
    LoadBalancer, MigrationPreview,
};
pub use cluster::{ClusterClient, ProxmoxClient, ProxmoxConfig};
pub use config::{BalancerConfig, ResourceWeights, ScoringParams};
pub use error::{BalancerError, Result};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{BalancerMetrics, StructuredLogger};
