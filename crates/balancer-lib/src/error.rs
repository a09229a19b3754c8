//! Error taxonomy for the placement and balancing engine

use thiserror::Error;

/// Errors surfaced by the engine
///
/// Per-node problems are absorbed where they occur and only reported;
/// `ClusterUnavailable` and `Configuration` are the variants that abort an operation.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The controller could not list any node
    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    /// Stats for a single node could not be fetched this cycle
    #[error("telemetry unavailable for node {node}: {reason}")]
    TelemetryUnavailable { node: String, reason: String },

    /// No node has enough free capacity for the requested workload
    #[error("no node can satisfy the requested resources")]
    InfeasibleRequirement,

    /// The controller rejected or timed out a migration
    #[error("migration of {workload_id} from {source_node} to {target_node} failed: {reason}")]
    MigrationFailed {
        workload_id: String,
        source_node: String,
        target_node: String,
        reason: String,
    },

    /// The workload is not running on the named node
    #[error("workload {workload_id} not found on node {node}")]
    WorkloadNotFound { workload_id: String, node: String },

    /// A requested migration violates the placement rules
    #[error("migration rejected: {0}")]
    MigrationRejected(String),

    /// Configuration values that cannot be repaired automatically
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, BalancerError>;
