//! Linear trend extrapolation
//!
//! Fits an ordinary least-squares line through the samples, using the sample
//! index as x, and extrapolates it a fixed number of steps past the last one.

use super::Predictor;
use crate::models::clamp_ratio;

/// Default number of steps extrapolated past the last sample
pub const DEFAULT_HORIZON: usize = 1;

/// Slope and intercept of a least-squares fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Fit y = intercept + slope * x with x = 0..n-1
///
/// Returns `None` for fewer than two samples.
pub fn linear_fit(values: &[f64]) -> Option<LinearFit> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }

    let slope = if sxx.abs() < f64::EPSILON {
        0.0
    } else {
        sxy / sxx
    };
    Some(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Population standard deviation, 0 for an empty slice
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / n).sqrt()
}

/// Stateless linear-regression forecaster
#[derive(Debug, Clone, Copy)]
pub struct TrendPredictor {
    horizon: usize,
}

impl TrendPredictor {
    pub fn new(horizon: usize) -> Self {
        Self { horizon }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }
}

impl Default for TrendPredictor {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON)
    }
}

impl Predictor for TrendPredictor {
    fn predict(&self, history: &[f64]) -> f64 {
        let Some(fit) = linear_fit(history) else {
            return history.last().copied().unwrap_or(0.0);
        };
        let x = (history.len() - 1 + self.horizon) as f64;
        clamp_ratio(fit.at(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_history_returns_last_sample() {
        let p = TrendPredictor::default();
        assert_eq!(p.predict(&[]), 0.0);
        assert_eq!(p.predict(&[0.42]), 0.42);
    }

    #[test]
    fn test_linear_series_extrapolates_one_step() {
        let p = TrendPredictor::default();
        let predicted = p.predict(&[0.1, 0.2, 0.3, 0.4]);
        assert!((predicted - 0.5).abs() < 1e-9, "predicted {}", predicted);
    }

    #[test]
    fn test_longer_horizon() {
        let p = TrendPredictor::new(3);
        let predicted = p.predict(&[0.1, 0.2, 0.3]);
        assert!((predicted - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_has_zero_slope() {
        let fit = linear_fit(&[0.35; 6]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert!((TrendPredictor::default().predict(&[0.35; 6]) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_prediction_is_clamped() {
        let p = TrendPredictor::default();
        assert_eq!(p.predict(&[0.7, 0.85, 1.0]), 1.0);
        assert_eq!(p.predict(&[0.2, 0.1, 0.0]), 0.0);
    }

    #[test]
    fn test_fit_matches_known_line() {
        let fit = linear_fit(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!(linear_fit(&[1.0]).is_none());
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(std_dev(&[0.5, 0.5, 0.5]), 0.0);
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&values) - 2.0).abs() < 1e-12);
    }
}
