//! Observability for the balancer
//!
//! Provides:
//! - Prometheus metrics (cycle and telemetry latency, node classes, migration counters)
//! - Structured JSON logging of balancer events with tracing

use crate::models::MigrationRecommendation;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for cycle and refresh latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<BalancerMetricsInner> = OnceLock::new();

struct BalancerMetricsInner {
    cycle_latency_seconds: Histogram,
    telemetry_refresh_seconds: Histogram,
    nodes_online: IntGauge,
    nodes_overloaded: IntGauge,
    nodes_underloaded: IntGauge,
    migrations_issued: IntCounter,
    migrations_failed: IntCounter,
    migrations_skipped: IntCounterVec,
    telemetry_errors: IntCounter,
    cycle_failures: IntCounter,
}

impl BalancerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "pve_balancer_cycle_latency_seconds",
                "Duration of a full balance cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            telemetry_refresh_seconds: register_histogram!(
                "pve_balancer_telemetry_refresh_seconds",
                "Duration of a telemetry refresh across all nodes",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register telemetry_refresh_seconds"),

            nodes_online: register_int_gauge!(
                "pve_balancer_nodes_online",
                "Number of online nodes seen in the last cycle"
            )
            .expect("Failed to register nodes_online"),

            nodes_overloaded: register_int_gauge!(
                "pve_balancer_nodes_overloaded",
                "Number of nodes classified overloaded in the last cycle"
            )
            .expect("Failed to register nodes_overloaded"),

            nodes_underloaded: register_int_gauge!(
                "pve_balancer_nodes_underloaded",
                "Number of nodes classified underloaded in the last cycle"
            )
            .expect("Failed to register nodes_underloaded"),

            migrations_issued: register_int_counter!(
                "pve_balancer_migrations_issued_total",
                "Migrations accepted by the cluster controller"
            )
            .expect("Failed to register migrations_issued"),

            migrations_failed: register_int_counter!(
                "pve_balancer_migrations_failed_total",
                "Migrations rejected by or timed out at the cluster controller"
            )
            .expect("Failed to register migrations_failed"),

            migrations_skipped: register_int_counter_vec!(
                "pve_balancer_migrations_skipped_total",
                "Workloads left in place on overloaded nodes",
                &["reason"]
            )
            .expect("Failed to register migrations_skipped"),

            telemetry_errors: register_int_counter!(
                "pve_balancer_telemetry_errors_total",
                "Node status requests that failed or timed out"
            )
            .expect("Failed to register telemetry_errors"),

            cycle_failures: register_int_counter!(
                "pve_balancer_cycle_failures_total",
                "Balance cycles aborted because the cluster was unavailable"
            )
            .expect("Failed to register cycle_failures"),
        }
    }
}

/// Handle to the process-wide balancer metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct BalancerMetrics {
    _private: (),
}

impl Default for BalancerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerMetrics {
    /// Create a handle, registering the metrics on first use
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BalancerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &BalancerMetricsInner {
        GLOBAL_METRICS.get_or_init(BalancerMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn observe_telemetry_refresh(&self, duration_secs: f64) {
        self.inner().telemetry_refresh_seconds.observe(duration_secs);
    }

    /// Update the node gauges after classification
    pub fn set_node_counts(&self, online: i64, overloaded: i64, underloaded: i64) {
        let inner = self.inner();
        inner.nodes_online.set(online);
        inner.nodes_overloaded.set(overloaded);
        inner.nodes_underloaded.set(underloaded);
    }

    pub fn inc_migrations_issued(&self) {
        self.inner().migrations_issued.inc();
    }

    pub fn inc_migrations_failed(&self) {
        self.inner().migrations_failed.inc();
    }

    pub fn inc_migrations_skipped(&self, reason: &str) {
        self.inner()
            .migrations_skipped
            .with_label_values(&[reason])
            .inc();
    }

    pub fn add_telemetry_errors(&self, count: u64) {
        self.inner().telemetry_errors.inc_by(count);
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures.inc();
    }
}

/// Structured logger for balancer events
///
/// Every event carries a stable `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, check_interval_secs: u64) {
        info!(
            event = "balancer_started",
            cluster = %self.cluster,
            version = %version,
            check_interval_secs = check_interval_secs,
            "Workload balancer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "balancer_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Workload balancer shutting down"
        );
    }

    pub fn log_node_classified(&self, node: &str, load: f64, class: &str) {
        info!(
            event = "node_classified",
            cluster = %self.cluster,
            node = %node,
            load = load,
            class = %class,
            "Node outside the balanced band"
        );
    }

    pub fn log_migration_issued(&self, rec: &MigrationRecommendation) {
        info!(
            event = "migration_issued",
            cluster = %self.cluster,
            workload_id = %rec.workload_id,
            workload_name = %rec.workload_name,
            source = %rec.source_node,
            target = %rec.target_node,
            source_load_before = rec.impact.source_load_before,
            source_load_after = rec.impact.source_load_after,
            target_load_before = rec.impact.target_load_before,
            target_load_after = rec.impact.target_load_after,
            reason = %rec.reason,
            "Migration issued"
        );
    }

    pub fn log_migration_failed(&self, rec: &MigrationRecommendation, error: &str) {
        warn!(
            event = "migration_failed",
            cluster = %self.cluster,
            workload_id = %rec.workload_id,
            source = %rec.source_node,
            target = %rec.target_node,
            error = %error,
            "Migration failed"
        );
    }

    pub fn log_migration_skipped(&self, workload_id: &str, source: &str, reason: &str) {
        info!(
            event = "migration_skipped",
            cluster = %self.cluster,
            workload_id = %workload_id,
            source = %source,
            reason = %reason,
            "Workload left in place"
        );
    }

    pub fn log_cycle_completed(
        &self,
        nodes: usize,
        executed: usize,
        failed: usize,
        skipped: usize,
        elapsed_ms: u64,
    ) {
        info!(
            event = "cycle_completed",
            cluster = %self.cluster,
            nodes = nodes,
            executed = executed,
            failed = failed,
            skipped = skipped,
            elapsed_ms = elapsed_ms,
            "Balance cycle completed"
        );
    }

    pub fn log_cycle_failed(&self, error: &str) {
        error!(
            event = "cycle_failed",
            cluster = %self.cluster,
            error = %error,
            "Balance cycle failed, retrying next interval"
        );
    }
}
