//! Integration tests for the balancer API endpoints

#[allow(dead_code)]
#[path = "../src/api.rs"]
mod api;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use balancer_lib::{
    health::HealthRegistry, BalancerConfig, ByteUsage,
    ClusterClient, CpuStatus, LoadBalancer, NodeCapacity, NodeInfo, NodeStatus, ResourceWeights,
    WorkloadInfo,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const GIB: u64 = 1024 * 1024 * 1024;

/// Fixed-usage cluster recording issued migrations
struct StaticCluster {
    nodes: Vec<(String, f64, f64)>,
    workloads: Mutex<Vec<WorkloadInfo>>,
    migrations: Mutex<Vec<String>>,
    unavailable: bool,
}

impl StaticCluster {
    fn new(nodes: &[(&str, f64, f64)]) -> Self {
        Self {
            nodes: nodes
                .iter()
                .map(|(n, cpu, mem)| (n.to_string(), *cpu, *mem))
                .collect(),
            workloads: Mutex::new(Vec::new()),
            migrations: Mutex::new(Vec::new()),
            unavailable: false,
        }
    }

    fn with_workload(self, id: &str, node: &str) -> Self {
        self.workloads.lock().unwrap().push(WorkloadInfo {
            id: id.to_string(),
            name: format!("svc-{}", id),
            node: node.to_string(),
            running: true,
            cpu_cores: 2.0,
            memory_bytes: 4 * GIB,
            disk_bytes: 10 * GIB,
            ha_managed: false,
        });
        self
    }

    fn usage(&self, node: &str) -> Result<(f64, f64)> {
        self.nodes
            .iter()
            .find(|(n, _, _)| n == node)
            .map(|(_, cpu, mem)| (*cpu, *mem))
            .ok_or_else(|| anyhow::anyhow!("unknown node {}", node))
    }
}

#[async_trait]
impl ClusterClient for StaticCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        if self.unavailable {
            anyhow::bail!("connection refused");
        }
        Ok(self.nodes.iter().map(|(n, _, _)| NodeInfo::online(n.as_str())).collect())
    }

    async fn node_status(&self, node: &str) -> Result<NodeStatus> {
        let (cpu, mem) = self.usage(node)?;
        let mem_total = 64 * GIB;
        let mem_used = (mem_total as f64 * mem) as u64;
        Ok(NodeStatus {
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
                total: 1024 * GIB,
                used: 100 * GIB,
                free: 924 * GIB,
            },
            network: None,
        })
    }

    async fn node_capacity(&self, node: &str) -> Result<NodeCapacity> {
        let (cpu, _) = self.usage(node)?;
        Ok(NodeCapacity {
            max_cpu: 16,
            current_cpu_used: 16.0 * cpu,
            capabilities: Vec::new(),
        })
    }

    async fn list_workloads(&self, node: &str) -> Result<Vec<WorkloadInfo>> {
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.node == node)
            .cloned()
            .collect())
    }

    async fn migrate(&self, workload_id: &str, _source: &str, target: &str, _online: bool) -> Result<()> {
        self.migrations.lock().unwrap().push(workload_id.to_string());
        for w in self.workloads.lock().unwrap().iter_mut() {
            if w.id == workload_id {
                w.node = target.to_string();
            }
        }
        Ok(())
    }
}

fn test_config() -> BalancerConfig {
    BalancerConfig {
        resource_weights: ResourceWeights::new(0.5, 0.5, 0.0, 0.0),
        ..Default::default()
    }
}

async fn setup_app(cluster: Arc<StaticCluster>) -> Router {
    setup_app_with(cluster, test_config()).await
}

async fn setup_app_with(cluster: Arc<StaticCluster>, config: BalancerConfig) -> Router {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;
    health_registry.set_ready(true).await;

    let balancer = LoadBalancer::new(cluster as Arc<dyn ClusterClient>, config)
        .unwrap()
        .with_health(health_registry.clone());
    let state = Arc::new(api::AppState::new(health_registry, Arc::new(balancer)));
    api::create_router(state)
}

fn imbalanced() -> Arc<StaticCluster> {
    Arc::new(StaticCluster::new(&[("pve1", 0.9, 0.85), ("pve2", 0.2, 0.3)]).with_workload("101", "pve1"))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_healthz_and_readyz() {
    let app = setup_app(imbalanced()).await;

    let (status, body) = send(app.clone(), get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["components"]["telemetry"].is_object());

    let (status, body) = send(app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_app(imbalanced()).await;
    send(app.clone(), json_request("POST", "/api/balance", Value::Null)).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("pve_balancer_cycle_latency_seconds"));
}

#[tokio::test]
async fn test_status_classifies_nodes() {
    let app = setup_app(imbalanced()).await;

    let (status, body) = send(app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    let nodes = body["nodes"].as_array().unwrap();
    assert_eq!(nodes[0]["node"], "pve1");
    assert_eq!(nodes[0]["class"], "overloaded");
    assert_eq!(nodes[1]["class"], "underloaded");
}

#[tokio::test]
async fn test_select_and_recommend_nodes() {
    let app = setup_app(imbalanced()).await;

    let (status, body) = send(app.clone(), json_request("POST", "/api/nodes/select", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node"], "pve2");

    let request = serde_json::json!({
        "requirement": { "cpu_cores": 2.0, "memory_bytes": 40 * GIB, "disk_bytes": GIB },
        "excluded_nodes": []
    });
    let (_, body) = send(app.clone(), json_request("POST", "/api/nodes/select", request)).await;
    assert_eq!(body["node"], "pve2");

    let request = serde_json::json!({
        "requirement": { "cpu_cores": 2.0, "memory_bytes": 60 * GIB, "disk_bytes": GIB }
    });
    let (_, body) = send(app.clone(), json_request("POST", "/api/nodes/select", request)).await;
    assert!(body["node"].is_null());

    let (_, body) = send(app, get("/api/nodes/recommend?count=5")).await;
    assert_eq!(body["nodes"], serde_json::json!(["pve2", "pve1"]));
}

#[tokio::test]
async fn test_recommendations_then_balance_then_history() {
    let cluster = imbalanced();
    let app = setup_app(Arc::clone(&cluster)).await;

    let (_, body) = send(app.clone(), get("/api/recommendations")).await;
    assert_eq!(body["recommendations"][0]["workload_id"], "101");
    assert!(cluster.migrations.lock().unwrap().is_empty());

    let (status, body) = send(app.clone(), json_request("POST", "/api/balance", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["actions"][0]["action"], "executed");
    assert_eq!(body["actions"][0]["recommendation"]["target_node"], "pve2");
    assert_eq!(*cluster.migrations.lock().unwrap(), vec!["101".to_string()]);

    let (_, body) = send(app, get("/api/migrations/history?limit=5&workload_id=101")).await;
    let migrations = body["migrations"].as_array().unwrap();
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0]["outcome"], "initiated");
}

#[tokio::test]
async fn test_set_weights() {
    let app = setup_app(imbalanced()).await;

    let (status, body) = send(
        app.clone(),
        json_request("PUT", "/api/weights", serde_json::json!({ "cpu": 2.0, "memory": 2.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["weights"]["cpu"], 0.5);

    let (status, body) = send(
        app,
        json_request("PUT", "/api/weights", serde_json::json!({ "cpu": 0.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("positive sum"));
}

#[tokio::test]
async fn test_unreachable_cluster_returns_503() {
    let mut cluster = StaticCluster::new(&[("pve1", 0.5, 0.5)]);
    cluster.unavailable = true;
    let app = setup_app(Arc::new(cluster)).await;

    let (status, body) = send(app, json_request("POST", "/api/balance", Value::Null)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("cluster unavailable"));
}

#[tokio::test]
async fn test_manual_migration() {
    let cluster = imbalanced();
    let app = setup_app(Arc::clone(&cluster)).await;

    let request = serde_json::json!({
        "workload_id": "101",
        "source_node": "pve1",
        "target_node": "pve2"
    });
    let (status, body) = send(app.clone(), json_request("POST", "/api/migrate", request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "initiated");
    assert_eq!(body["migration"]["reason"], "manual");
    assert_eq!(*cluster.migrations.lock().unwrap(), vec!["101".to_string()]);

    let (_, body) = send(app, get("/api/migrations/history")).await;
    assert_eq!(body["migrations"][0]["reason"], "manual");
}

#[tokio::test]
async fn test_manual_migration_errors() {
    let cluster = imbalanced();
    let config = BalancerConfig {
        node_exclusions: vec!["pve3".to_string()],
        ..test_config()
    };
    let app = setup_app_with(Arc::clone(&cluster), config).await;

    let missing = serde_json::json!({
        "workload_id": "999",
        "source_node": "pve1",
        "target_node": "pve2"
    });
    let (status, body) = send(app.clone(), json_request("POST", "/api/migrate", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("999"));

    let excluded = serde_json::json!({
        "workload_id": "101",
        "source_node": "pve1",
        "target_node": "pve3"
    });
    let (status, _) = send(app, json_request("POST", "/api/migrate", excluded)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(cluster.migrations.lock().unwrap().is_empty());
}
