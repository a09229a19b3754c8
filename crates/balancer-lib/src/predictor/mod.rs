//! Utilization trend prediction

mod trend;

pub use trend::{linear_fit, std_dev, LinearFit, TrendPredictor, DEFAULT_HORIZON};

/// Trait for utilization forecasters
pub trait Predictor: Send + Sync {
    /// Forecast the next utilization ratio from a series ordered oldest first
    fn predict(&self, history: &[f64]) -> f64;
}
