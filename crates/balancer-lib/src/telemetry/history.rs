//! Bounded sample series

use crate::models::{clamp_ratio, NodeUtilization, ResourceKind};
use std::collections::VecDeque;

/// Default number of samples kept per node and resource
pub const DEFAULT_WINDOW: usize = 20;

/// Ordered utilization samples for one resource, oldest first
#[derive(Debug, Clone)]
pub struct ResourceHistory {
    samples: VecDeque<f64>,
    window: usize,
}

impl ResourceHistory {
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Append a sample, evicting the oldest ones beyond the window
    pub fn push(&mut self, value: f64) {
        self.samples.push_back(clamp_ratio(value));
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

/// Histories of every tracked resource of one node
#[derive(Debug, Clone)]
pub struct NodeHistory {
    cpu: ResourceHistory,
    memory: ResourceHistory,
    disk: ResourceHistory,
    network: ResourceHistory,
}

impl NodeHistory {
    pub fn new(window: usize) -> Self {
        Self {
            cpu: ResourceHistory::new(window),
            memory: ResourceHistory::new(window),
            disk: ResourceHistory::new(window),
            network: ResourceHistory::new(window),
        }
    }

    /// Append one sample per resource; network only when it was measured
    pub fn record(&mut self, utilization: &NodeUtilization) {
        self.cpu.push(utilization.cpu);
        self.memory.push(utilization.memory);
        self.disk.push(utilization.disk);
        if let Some(network) = utilization.network {
            self.network.push(network);
        }
    }

    pub fn get(&self, kind: ResourceKind) -> &ResourceHistory {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
            ResourceKind::Disk => &self.disk,
            ResourceKind::Network => &self.network,
        }
    }
}
