//! Outcome of fitting one composite model to one series.

use crate::core::{Cadence, TimeGrid};
use crate::models::CompositeModel;
use chrono::{DateTime, Utc};

/// A fitted model.
///
/// Borrows the model definition it came from and owns its parameters and
/// residuals. `fitted` and `residuals` align with the series timestamps;
/// residuals are NaN where the series is missing or the point carried zero
/// weight.
#[derive(Debug, Clone)]
pub struct FitResult<'m> {
    model: &'m CompositeModel,
    params: Vec<f64>,
    fitted: Vec<f64>,
    residuals: Vec<f64>,
    sse: f64,
    n_obs: usize,
    score: f64,
    converged: bool,
    iterations: usize,
    origin: DateTime<Utc>,
    cadence: Cadence,
}

impl<'m> FitResult<'m> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        model: &'m CompositeModel,
        params: Vec<f64>,
        fitted: Vec<f64>,
        residuals: Vec<f64>,
        sse: f64,
        n_obs: usize,
        score: f64,
        converged: bool,
        iterations: usize,
        origin: DateTime<Utc>,
        cadence: Cadence,
    ) -> Self {
        Self {
            model,
            params,
            fitted,
            residuals,
            sse,
            n_obs,
            score,
            converged,
            iterations,
            origin,
            cadence,
        }
    }

    pub fn model(&self) -> &'m CompositeModel {
        self.model
    }

    pub fn model_name(&self) -> &'m str {
        self.model.name()
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    /// In-sample model values at every series timestamp.
    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    /// `actual - fitted` at every series timestamp.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Residuals of the points that took part in the fit.
    pub fn observed_residuals(&self) -> Vec<f64> {
        self.residuals
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .collect()
    }

    /// Weighted sum of squared residuals.
    pub fn sse(&self) -> f64 {
        self.sse
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn n_params(&self) -> usize {
        self.model.n_params()
    }

    /// Information-criterion score; lower is better.
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Timestamp of step 0 of the fitted time axis.
    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Evaluate the fitted model at arbitrary timestamps.
    pub fn predict(&self, timestamps: &[DateTime<Utc>]) -> Vec<f64> {
        let grid = TimeGrid::new(self.origin, &self.cadence, timestamps.to_vec());
        self.predict_grid(&grid)
    }

    /// Evaluate the fitted model on a grid sharing this fit's origin.
    pub fn predict_grid(&self, grid: &TimeGrid) -> Vec<f64> {
        self.model.evaluate_unchecked(grid, &self.params)
    }
}
