//! Migration history and per-workload cooldown

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default number of entries returned by `MigrationHistory::query`
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Outcome of an issued migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationOutcome {
    Initiated,
    Failed,
}

/// One issued migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub workload_id: String,
    pub workload_name: String,
    pub source_node: String,
    pub target_node: String,
    pub reason: String,
    pub outcome: MigrationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

/// Bounded log of issued migrations
pub struct MigrationHistory {
    limit: usize,
    records: RwLock<VecDeque<MigrationRecord>>,
    last_migrated: DashMap<String, Instant>,
}

impl MigrationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: RwLock::new(VecDeque::new()),
            last_migrated: DashMap::new(),
        }
    }

    /// Append a record, evicting the oldest beyond the limit
    ///
    /// Only initiated migrations start a cooldown.
    pub async fn record(&self, record: MigrationRecord) {
        if record.outcome == MigrationOutcome::Initiated {
            self.last_migrated
                .insert(record.workload_id.clone(), Instant::now());
        }
        let mut records = self.records.write().await;
        records.push_back(record);
        while records.len() > self.limit {
            records.pop_front();
        }
    }

    /// Most recent records first, optionally for a single workload
    pub async fn query(&self, limit: Option<usize>, workload_id: Option<&str>) -> Vec<MigrationRecord> {
        let limit = limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let records = self.records.read().await;
        records
            .iter()
            .rev()
            .filter(|r| workload_id.map_or(true, |id| r.workload_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True if the workload was migrated less than `interval` ago
    pub fn is_cooling_down(&self, workload_id: &str, interval: Duration) -> bool {
        self.last_migrated
            .get(workload_id)
            .map(|at| at.elapsed() < interval)
            .unwrap_or(false)
    }
}
