//! Prediction intervals from in-sample residuals.

use crate::core::PredictionInterval;
use crate::error::{ForecastError, Result};
use crate::utils::stats::quantile;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// How residuals are turned into interval widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    /// Empirical residual quantiles.
    #[default]
    Empirical,
    /// Normal quantiles times the residual standard deviation.
    Gaussian,
}

/// Configuration for prediction intervals.
///
/// Widths grow with the square root of the forecast step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Confidence levels in (0, 1). Empty disables intervals.
    pub levels: Vec<f64>,
    pub method: IntervalMethod,
    /// Fewer finite residuals than this omit the bounds.
    pub min_residuals: usize,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            levels: vec![0.6, 0.9],
            method: IntervalMethod::Empirical,
            min_residuals: 5,
        }
    }
}

impl IntervalConfig {
    pub fn with_levels(mut self, levels: Vec<f64>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_method(mut self, method: IntervalMethod) -> Self {
        self.method = method;
        self
    }

    /// Reject levels outside (0, 1).
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self
            .levels
            .iter()
            .find(|l| !(l.is_finite() && **l > 0.0 && **l < 1.0))
        {
            return Err(ForecastError::InvalidParameter(format!(
                "interval level must be in (0, 1), got {}",
                level
            )));
        }
        Ok(())
    }
}

/// Per-level one-step offsets below and above the point forecast.
#[derive(Debug, Clone)]
pub struct ResidualSpread {
    /// `(level, lower offset <= 0, upper offset >= 0)`.
    offsets: Vec<(f64, f64, f64)>,
}

impl ResidualSpread {
    /// Estimate offsets from residuals; non-finite residuals are ignored.
    ///
    /// Returns `None` when there are too few residuals.
    pub fn from_residuals(residuals: &[f64], config: &IntervalConfig) -> Option<Self> {
        let finite: Vec<f64> = residuals.iter().copied().filter(|r| r.is_finite()).collect();
        if finite.len() < config.min_residuals.max(2) {
            return None;
        }

        let offsets = match config.method {
            IntervalMethod::Empirical => config
                .levels
                .iter()
                .map(|&level| {
                    let lo = quantile(&finite, (1.0 - level) / 2.0).min(0.0);
                    let hi = quantile(&finite, (1.0 + level) / 2.0).max(0.0);
                    (level, lo, hi)
                })
                .collect(),
            IntervalMethod::Gaussian => {
                let sd = (finite.iter().map(|r| r * r).sum::<f64>() / (finite.len() - 1) as f64)
                    .sqrt();
                let normal = Normal::new(0.0, 1.0).ok()?;
                config
                    .levels
                    .iter()
                    .map(|&level| {
                        let half = normal.inverse_cdf((1.0 + level) / 2.0) * sd;
                        (level, -half, half)
                    })
                    .collect()
            }
        };
        Some(Self { offsets })
    }

    /// Intervals around `value` at forecast step `step` (1 = first future point).
    pub fn intervals(&self, value: f64, step: usize) -> Vec<PredictionInterval> {
        let growth = (step.max(1) as f64).sqrt();
        self.offsets
            .iter()
            .map(|&(level, lo, hi)| PredictionInterval {
                level,
                lower: value + lo * growth,
                upper: value + hi * growth,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn residuals() -> Vec<f64> {
        vec![-2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0, f64::NAN]
    }

    #[test]
    fn empirical_intervals_bracket_and_widen() {
        let spread = ResidualSpread::from_residuals(&residuals(), &IntervalConfig::default()).unwrap();
        let first = spread.intervals(10.0, 1);
        let later = spread.intervals(10.0, 4);

        assert_eq!(first.len(), 2);
        for (a, b) in first.iter().zip(&later) {
            assert!(a.brackets(10.0));
            assert!(b.brackets(10.0));
            assert_relative_eq!(b.upper - 10.0, 2.0 * (a.upper - 10.0), epsilon = 1e-12);
        }
        let q90 = first.iter().find(|pi| pi.level == 0.9).unwrap();
        assert_relative_eq!(q90.lower, 10.0 + quantile(&residuals()[..7], 0.05));
    }

    #[test]
    fn one_sided_residuals_still_bracket() {
        let spread = ResidualSpread::from_residuals(
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &IntervalConfig::default(),
        )
        .unwrap();
        for pi in spread.intervals(0.0, 1) {
            assert_eq!(pi.lower, 0.0);
            assert!(pi.upper > 0.0);
        }
    }

    #[test]
    fn gaussian_intervals_use_normal_quantiles() {
        let config = IntervalConfig::default()
            .with_levels(vec![0.95])
            .with_method(IntervalMethod::Gaussian);
        let r = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let spread = ResidualSpread::from_residuals(&r, &config).unwrap();
        let pi = spread.intervals(0.0, 1)[0];
        let sd = (6.0_f64 / 5.0).sqrt();
        assert_relative_eq!(pi.upper, 1.959964 * sd, epsilon = 1e-4);
        assert_relative_eq!(pi.lower, -pi.upper, epsilon = 1e-12);
    }

    #[test]
    fn too_few_residuals_yield_none() {
        assert!(ResidualSpread::from_residuals(&[0.1, 0.2, f64::NAN], &IntervalConfig::default())
            .is_none());
    }

    #[test]
    fn validate_rejects_out_of_range_levels() {
        assert!(IntervalConfig::default().validate().is_ok());
        assert!(IntervalConfig::default().with_levels(vec![1.0]).validate().is_err());
        assert!(IntervalConfig::default().with_levels(vec![-0.1]).validate().is_err());
    }
}
