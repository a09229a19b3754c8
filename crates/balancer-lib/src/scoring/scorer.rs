//! Node scoring
//!
//! Lower scores mean more headroom. A node without data, or one that cannot fit
//! the requested workload, scores `f64::INFINITY` and is never selected.

use crate::config::{ResourceWeights, ScoringParams};
use crate::models::{NodeCapacity, ResourceKind, WorkloadRequirement};
use crate::predictor::{std_dev, Predictor, TrendPredictor};
use crate::telemetry::NodeSeries;
use serde::{Deserialize, Serialize};

/// Minimum samples before the variability penalty applies
const MIN_VARIABILITY_SAMPLES: usize = 3;

/// Score of one node for one decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScore {
    pub node: String,
    pub score: f64,
}

impl NodeScore {
    pub fn is_eligible(&self) -> bool {
        self.score.is_finite()
    }
}

/// Combines current and predicted utilization into one comparable value
pub struct NodeScorer {
    weights: ResourceWeights,
    params: ScoringParams,
    predictor: Box<dyn Predictor>,
}

impl NodeScorer {
    pub fn new(weights: ResourceWeights, params: ScoringParams) -> Self {
        let predictor = Box::new(TrendPredictor::new(params.prediction_horizon));
        Self::with_predictor(weights, params, predictor)
    }

    pub fn with_predictor(
        weights: ResourceWeights,
        params: ScoringParams,
        predictor: Box<dyn Predictor>,
    ) -> Self {
        Self {
            weights,
            params,
            predictor,
        }
    }

    pub fn weights(&self) -> &ResourceWeights {
        &self.weights
    }

    /// `current_weight * last + predicted_weight * forecast`, or `None` without samples
    pub fn blend(&self, series: &[f64]) -> Option<f64> {
        let current = *series.last()?;
        let predicted = self.predictor.predict(series);
        Some(self.params.current_weight * current + self.params.predicted_weight * predicted)
    }

    /// Weighted blended utilization of a node, without penalties
    ///
    /// Network counts only when the node reports network samples. The weights
    /// of the resources actually tracked are rescaled to sum to 1 so the load
    /// stays comparable with the thresholds.
    pub fn blended_load(&self, series: &NodeSeries) -> Option<f64> {
        if !series.has_data() {
            return None;
        }

        let tracked: Vec<(f64, f64)> = ResourceKind::ALL
            .iter()
            .filter_map(|kind| {
                let blended = self.blend(series.get(*kind))?;
                Some((self.weights.get(*kind), blended))
            })
            .collect();

        let weight_sum: f64 = tracked.iter().map(|(w, _)| w).sum();
        if weight_sum <= 0.0 {
            let n = tracked.len() as f64;
            return Some(tracked.iter().map(|(_, b)| b).sum::<f64>() / n);
        }
        Some(tracked.iter().map(|(w, b)| w * b).sum::<f64>() / weight_sum)
    }

    /// Penalty for noisy CPU and memory series
    pub fn variability_penalty(&self, series: &NodeSeries) -> f64 {
        let cpu_std = self.recent_std(&series.cpu);
        let memory_std = self.recent_std(&series.memory);
        (cpu_std + memory_std) / 2.0 * self.params.variability_factor
    }

    fn recent_std(&self, values: &[f64]) -> f64 {
        if values.len() < MIN_VARIABILITY_SAMPLES {
            return 0.0;
        }
        let window = self.params.variability_window.max(MIN_VARIABILITY_SAMPLES);
        let start = values.len().saturating_sub(window);
        std_dev(&values[start..])
    }

    /// Whether a node can host `requirement` given its live capacity
    pub fn is_feasible(
        series: &NodeSeries,
        capacity: &NodeCapacity,
        requirement: &WorkloadRequirement,
    ) -> bool {
        if requirement.cpu_cores > capacity.free_cores() {
            return false;
        }
        if let Some(tag) = &requirement.capability {
            if !capacity.has_capability(tag) {
                return false;
            }
        }
        let Some(status) = &series.latest else {
            return false;
        };
        requirement.memory_bytes <= status.memory.free && requirement.disk_bytes <= status.rootfs.free
    }

    /// Final score of a node
    ///
    /// `capacity` is only consulted when a requirement is given; a requirement
    /// without capacity data makes the node ineligible.
    pub fn score(
        &self,
        series: Option<&NodeSeries>,
        capacity: Option<&NodeCapacity>,
        requirement: Option<&WorkloadRequirement>,
    ) -> f64 {
        let Some(series) = series else {
            return f64::INFINITY;
        };
        let Some(load) = self.blended_load(series) else {
            return f64::INFINITY;
        };

        if let Some(requirement) = requirement {
            match capacity {
                Some(capacity) if Self::is_feasible(series, capacity, requirement) => {}
                _ => return f64::INFINITY,
            }
        }

        load + self.variability_penalty(series)
    }
}
