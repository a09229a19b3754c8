//! Component health for liveness and readiness probes
//!
//! The balancer tracks three components:
//!
//! - `cluster`: whether the controller answers node listings. Unhealthy after a
//!   cycle failed with `ClusterUnavailable`, healthy again after the next
//!   successful refresh.
//! - `telemetry`: degraded while some nodes fail to report, naming them.
//! - `balancer`: the control loop itself; healthy after every completed cycle.
//!
//! Readiness requires initialization to have finished and the cluster to be
//! reachable. Degraded telemetry keeps the daemon ready, since the remaining
//! nodes are still balanced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working with reduced data, e.g. some nodes unreachable
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Parts of the balancer reported on `/healthz`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Cluster,
    Telemetry,
    Balancer,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Cluster, Component::Telemetry, Component::Balancer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Cluster => "cluster",
            Component::Telemetry => "telemetry",
            Component::Balancer => "balancer",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
    /// When the component entered its current status
    pub since_timestamp: i64,
    /// Reports in a row that were not healthy
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn initial() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: now,
            since_timestamp: now,
            consecutive_failures: 0,
        }
    }

    /// Fold a new report into the previous state
    fn apply(&mut self, status: ComponentStatus, message: Option<String>) {
        let now = chrono::Utc::now().timestamp();
        if status != self.status {
            self.since_timestamp = now;
        }
        self.consecutive_failures = match status {
            ComponentStatus::Healthy => 0,
            _ => self.consecutive_failures.saturating_add(1),
        };
        self.status = status;
        self.message = message;
        self.last_check_timestamp = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &BTreeMap<Component, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max_by_key(|s| match s {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared registry of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<Component, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every component as healthy
    pub async fn register_all(&self) {
        let mut components = self.components.write().await;
        for component in Component::ALL {
            components.insert(component, ComponentHealth::initial());
        }
    }

    /// Record a report; unregistered components are added on first report
    pub async fn report(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        self.components
            .write()
            .await
            .entry(component)
            .or_insert_with(ComponentHealth::initial)
            .apply(status, message);
    }

    pub async fn set_healthy(&self, component: Component) {
        self.report(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn status_of(&self, component: Component) -> Option<ComponentStatus> {
        self.components.read().await.get(&component).map(|h| h.status)
    }

    pub async fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.components.read().await.get(&component).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialized and no component is unhealthy
    ///
    /// The reason names the first unhealthy component and its last message.
    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("balancer not yet initialized".to_string()),
            };
        }

        let components = self.components.read().await;
        let unhealthy = components
            .iter()
            .find(|(_, h)| !h.status.is_operational());
        match unhealthy {
            Some((component, health)) => ReadinessResponse {
                ready: false,
                reason: Some(match &health.message {
                    Some(message) => format!("{} unhealthy: {}", component, message),
                    None => format!("{} unhealthy", component),
                }),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
