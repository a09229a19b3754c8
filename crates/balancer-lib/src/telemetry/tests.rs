//! Telemetry store tests against the in-memory cluster

use super::*;
use crate::cluster::mock::{MockCluster, MockNode};
use crate::cluster::ClusterClient;
use crate::error::BalancerError;
use crate::models::ResourceKind;
use std::sync::Arc;
use std::time::Duration;

fn store_for(cluster: Arc<MockCluster>, window: usize) -> TelemetryStore {
    TelemetryStore::new(
        cluster as Arc<dyn ClusterClient>,
        window,
        Duration::from_millis(100),
    )
}

#[tokio::test]
async fn test_refresh_appends_one_sample_per_resource() {
    let cluster = Arc::new(MockCluster::new(vec![
        MockNode::new("pve1", 0.5, 0.25, 0.1),
        MockNode::new("pve2", 0.2, 0.5, 0.3).with_network(0.4),
    ]));
    let store = store_for(cluster, DEFAULT_WINDOW);

    assert!(store.is_empty().await);
    let report = store.refresh().await.unwrap();
    assert_eq!(report.sampled, vec!["pve1".to_string(), "pve2".to_string()]);
    assert!(report.failed.is_empty());

    let snapshot = store.snapshot().await;
    let pve1 = snapshot.node("pve1").unwrap();
    assert_eq!(pve1.cpu, vec![0.5]);
    assert!((pve1.memory[0] - 0.25).abs() < 1e-6);
    assert!(pve1.network.is_empty());
    assert!(pve1.latest.is_some());

    let pve2 = snapshot.node("pve2").unwrap();
    assert_eq!(pve2.get(ResourceKind::Network), &[0.4]);
    assert!(!store.is_empty().await);
}

#[tokio::test]
async fn test_offline_nodes_are_skipped() {
    let cluster = Arc::new(MockCluster::new(vec![
        MockNode::new("pve1", 0.5, 0.5, 0.5),
        MockNode::new("pve2", 0.5, 0.5, 0.5).offline(),
    ]));
    let store = store_for(cluster.clone(), DEFAULT_WINDOW);

    let report = store.refresh().await.unwrap();
    assert_eq!(report.offline, vec!["pve2".to_string()]);
    assert!(store.snapshot().await.node("pve2").is_none());
    assert_eq!(cluster.status_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_history_is_trimmed_to_window() {
    let cluster = Arc::new(MockCluster::new(vec![MockNode::new("pve1", 0.0, 0.1, 0.1)]));
    let store = store_for(cluster.clone(), 3);

    for i in 0..5 {
        cluster.set_usage("pve1", i as f64 / 10.0, 0.1, 0.1);
        store.refresh().await.unwrap();
    }

    let snapshot = store.snapshot().await;
    let cpu = &snapshot.node("pve1").unwrap().cpu;
    assert_eq!(cpu.len(), 3);
    assert!((cpu[0] - 0.2).abs() < 1e-9);
    assert!((cpu[2] - 0.4).abs() < 1e-9);
    assert_eq!(snapshot.generation, 5);
}

#[tokio::test]
async fn test_failing_node_reported_and_others_sampled() {
    let cluster = Arc::new(MockCluster::new(vec![
        MockNode::new("pve1", 0.5, 0.5, 0.5),
        MockNode::new("pve2", 0.5, 0.5, 0.5),
    ]));
    cluster.fail_node("pve2");
    let store = store_for(cluster, DEFAULT_WINDOW);

    let report = store.refresh().await.unwrap();
    assert_eq!(report.sampled, vec!["pve1".to_string()]);
    assert_eq!(report.failed_nodes(), vec!["pve2"]);
    assert!(matches!(
        report.failed[0],
        BalancerError::TelemetryUnavailable { .. }
    ));
}

#[tokio::test]
async fn test_node_failing_after_samples_has_no_data_until_it_recovers() {
    let cluster = Arc::new(MockCluster::new(vec![
        MockNode::new("pve1", 0.5, 0.5, 0.5),
        MockNode::new("pve2", 0.1, 0.1, 0.1),
    ]));
    let store = store_for(cluster.clone(), DEFAULT_WINDOW);

    store.refresh().await.unwrap();
    assert!(store.snapshot().await.node("pve2").is_some());

    cluster.fail_node("pve2");
    store.refresh().await.unwrap();
    let snapshot = store.snapshot().await;
    assert!(snapshot.node("pve2").is_none());
    assert_eq!(snapshot.node("pve1").unwrap().cpu.len(), 2);

    cluster.recover_node("pve2");
    store.refresh().await.unwrap();
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.node("pve2").unwrap().cpu.len(), 2);
}

#[tokio::test]
async fn test_slow_node_times_out_without_stalling_others() {
    let cluster = Arc::new(MockCluster::new(vec![
        MockNode::new("fast", 0.5, 0.5, 0.5),
        MockNode::new("slow", 0.5, 0.5, 0.5),
    ]));
    cluster.slow_node("slow", Duration::from_secs(5));
    let store = store_for(cluster, DEFAULT_WINDOW);

    let report = store.refresh().await.unwrap();
    assert_eq!(report.sampled, vec!["fast".to_string()]);
    assert_eq!(report.failed_nodes(), vec!["slow"]);
    assert!(report.elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_unreachable_cluster_is_cycle_level_error() {
    let cluster = Arc::new(MockCluster::new(vec![MockNode::new("pve1", 0.5, 0.5, 0.5)]));
    cluster.set_unavailable(true);
    let store = store_for(cluster, DEFAULT_WINDOW);

    let err = store.refresh().await.unwrap_err();
    assert!(matches!(err, BalancerError::ClusterUnavailable(_)));
    assert!(store.is_empty().await);
    assert!(store.snapshot().await.is_empty());
}
