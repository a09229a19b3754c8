//! HTTP API for health checks, Prometheus metrics and balancer control

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use balancer_lib::{
    health::{ComponentStatus, HealthRegistry},
    BalancerError, LoadBalancer, ResourceWeights, WorkloadRequirement,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Node count returned by `/api/nodes/recommend` without `count`
const DEFAULT_RECOMMEND_COUNT: usize = 3;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub balancer: Arc<LoadBalancer>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, balancer: Arc<LoadBalancer>) -> Self {
        Self {
            health_registry,
            balancer,
        }
    }
}

/// Engine error rendered as `{"error": ...}` with a matching status code
pub struct ApiError(BalancerError);

impl From<BalancerError> for ApiError {
    fn from(err: BalancerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BalancerError::ClusterUnavailable(_) | BalancerError::TelemetryUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BalancerError::WorkloadNotFound { .. } => StatusCode::NOT_FOUND,
            BalancerError::MigrationRejected(_) => StatusCode::CONFLICT,
            BalancerError::Configuration(_) => StatusCode::BAD_REQUEST,
            BalancerError::InfeasibleRequirement => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(status = status.as_u16(), error = %self.0, "API request failed");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// 200 while operational, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus text exposition
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn cluster_status(State(state): State<Arc<AppState>>) -> ApiResult<balancer_lib::ClusterStatus> {
    Ok(Json(state.balancer.cluster_status().await?))
}

async fn recommendations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<balancer_lib::MigrationPreview> {
    Ok(Json(state.balancer.recommend_migrations().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub requirement: Option<WorkloadRequirement>,
    #[serde(default)]
    pub excluded_nodes: Vec<String>,
}

async fn select_node(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectRequest>,
) -> ApiResult<serde_json::Value> {
    let node = state
        .balancer
        .select_best_node(request.requirement.as_ref(), &request.excluded_nodes)
        .await?;
    Ok(Json(json!({ "node": node })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecommendQuery {
    pub count: Option<usize>,
}

async fn recommend_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecommendQuery>,
) -> ApiResult<serde_json::Value> {
    let count = query.count.unwrap_or(DEFAULT_RECOMMEND_COUNT);
    let nodes = state.balancer.recommend_nodes(count, None).await?;
    Ok(Json(json!({ "nodes": nodes })))
}

async fn balance(State(state): State<Arc<AppState>>) -> ApiResult<balancer_lib::CycleReport> {
    info!("Balance cycle requested via API");
    Ok(Json(state.balancer.run_balance_cycle().await?))
}

async fn set_weights(
    State(state): State<Arc<AppState>>,
    Json(weights): Json<ResourceWeights>,
) -> ApiResult<serde_json::Value> {
    let applied = state.balancer.set_weights(weights).await?;
    Ok(Json(json!({ "weights": applied })))
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub workload_id: String,
    pub source_node: String,
    pub target_node: String,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

async fn migrate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MigrateRequest>,
) -> ApiResult<serde_json::Value> {
    let migration = state
        .balancer
        .migrate_workload(
            &request.workload_id,
            &request.source_node,
            &request.target_node,
            request.online,
        )
        .await?;
    Ok(Json(json!({ "status": "initiated", "migration": migration })))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub workload_id: Option<String>,
}

async fn migration_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let migrations = state
        .balancer
        .migration_history(query.limit, query.workload_id.as_deref())
        .await;
    Json(json!({ "migrations": migrations }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/status", get(cluster_status))
        .route("/api/recommendations", get(recommendations))
        .route("/api/nodes/select", post(select_node))
        .route("/api/nodes/recommend", get(recommend_nodes))
        .route("/api/balance", post(balance))
        .route("/api/migrate", post(migrate))
        .route("/api/weights", put(set_weights))
        .route("/api/migrations/history", get(migration_history))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
