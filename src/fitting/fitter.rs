//! Bounded nonlinear least squares for composite models.

use crate::core::{Cadence, TimeGrid, TimeSeries};
use crate::error::{ForecastError, Result};
use crate::fitting::result::FitResult;
use crate::models::{Bounds, CompositeModel, GuessContext};
use crate::selection::InformationCriterion;
use crate::utils::optimization::{
    levenberg_marquardt, nelder_mead, LeastSquaresConfig, NelderMeadConfig, OptimizationResult,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Optimization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Solver {
    /// Bounded Levenberg-Marquardt on the weighted residuals.
    #[default]
    LevenbergMarquardt,
    /// Bounded Nelder-Mead on the weighted sum of squares.
    NelderMead,
}

/// Configuration for [`Fitter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub solver: Solver,
    /// Iteration cap per optimizer run.
    pub max_iter: usize,
    /// Relative cost-reduction tolerance.
    pub ftol: f64,
    /// Relative step tolerance.
    pub xtol: f64,
    /// Projected-gradient tolerance.
    pub gtol: f64,
    /// Extra runs from perturbed starts for multi-basin models.
    pub restarts: usize,
    /// Seed for restart perturbations.
    pub seed: u64,
    /// Wall-clock budget for one fit, shared by all of its restarts.
    pub time_budget: Option<Duration>,
    /// Score used to compare fits.
    pub criterion: InformationCriterion,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            solver: Solver::LevenbergMarquardt,
            max_iter: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            restarts: 4,
            seed: 42,
            time_budget: None,
            criterion: InformationCriterion::default(),
        }
    }
}

impl FitConfig {
    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn with_criterion(mut self, criterion: InformationCriterion) -> Self {
        self.criterion = criterion;
        self
    }
}

/// Observed points prepared for fitting.
///
/// Only points with a finite value and a positive weight take part.
#[derive(Debug, Clone)]
pub struct FitData {
    cadence: Cadence,
    /// Grid over every timestamp of the series.
    full_grid: TimeGrid,
    /// Grid over the fitted points.
    grid: TimeGrid,
    values: Vec<f64>,
    sqrt_weights: Vec<f64>,
    indices: Vec<usize>,
}

impl FitData {
    /// Prepare `series` for fitting.
    ///
    /// `weights` overrides the series' own weights. A zero weight excludes
    /// the point.
    pub fn new(series: &TimeSeries, cadence: Cadence, weights: Option<&[f64]>) -> Result<Self> {
        let weights = weights.or(series.weights());
        if let Some(w) = weights {
            if w.len() != series.len() {
                return Err(ForecastError::DimensionMismatch {
                    expected: series.len(),
                    got: w.len(),
                });
            }
            if let Some(i) = w.iter().position(|x| !x.is_finite() || *x < 0.0) {
                return Err(ForecastError::InvalidParameter(format!(
                    "weight at {} must be finite and non-negative",
                    series.timestamps()[i]
                )));
            }
        }

        let indices: Vec<usize> = series
            .observed_indices()
            .into_iter()
            .filter(|&i| weights.is_none_or(|w| w[i] > 0.0))
            .collect();
        if indices.is_empty() {
            return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
        }

        let full_grid = series.time_grid(&cadence);
        let grid = full_grid.select(&indices);
        let values = indices.iter().map(|&i| series.values()[i]).collect();
        let sqrt_weights = indices
            .iter()
            .map(|&i| weights.map_or(1.0, |w| w[i].sqrt()))
            .collect();

        Ok(Self {
            cadence,
            full_grid,
            grid,
            values,
            sqrt_weights,
            indices,
        })
    }

    /// Number of points taking part in the fit.
    pub fn n_obs(&self) -> usize {
        self.values.len()
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    fn weighted_residuals(&self, model: &CompositeModel, params: &[f64], out: &mut [f64]) {
        let fitted = model.evaluate_unchecked(&self.grid, params);
        for (i, r) in out.iter_mut().enumerate() {
            *r = self.sqrt_weights[i] * (fitted[i] - self.values[i]);
        }
    }

    /// Weighted mean of squared values, the scale used to floor scores.
    fn mean_square(&self) -> f64 {
        let total: f64 = self
            .values
            .iter()
            .zip(&self.sqrt_weights)
            .map(|(v, w)| (w * v).powi(2))
            .sum();
        total / self.n_obs() as f64
    }
}

/// Fits composite models to a series.
///
/// # Example
///
/// ```
/// use anofox_anticipate::core::TimeSeries;
/// use anofox_anticipate::fitting::Fitter;
/// use anofox_anticipate::models::{CompositeModel, ModelComponent};
/// use chrono::{Duration, TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
/// let timestamps = (0..10).map(|i| start + Duration::days(i)).collect();
/// let values = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
/// let series = TimeSeries::new(timestamps, values).unwrap();
///
/// let model = CompositeModel::new("linear", ModelComponent::linear());
/// let fit = Fitter::default().fit(&model, &series, None).unwrap();
///
/// assert!(fit.converged());
/// assert!((fit.params()[1] - 2.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Fitter {
    config: FitConfig,
}

impl Fitter {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fit `model` to `series`, inferring the cadence from its timestamps.
    pub fn fit<'m>(
        &self,
        model: &'m CompositeModel,
        series: &TimeSeries,
        weights: Option<&[f64]>,
    ) -> Result<FitResult<'m>> {
        let data = FitData::new(series, series.infer_cadence()?, weights)?;
        Ok(self.fit_prepared(model, &data))
    }

    /// Fit `model` to already prepared data.
    ///
    /// Never fails: numerical trouble shows up as `converged() == false`.
    pub fn fit_prepared<'m>(&self, model: &'m CompositeModel, data: &FitData) -> FitResult<'m> {
        let deadline = self.config.time_budget.map(|b| Instant::now() + b);
        let bounds = model.bounds();
        let box_bounds: Vec<(f64, f64)> = bounds.iter().map(|b| (b.lower, b.upper)).collect();

        let timestamps = data.grid.timestamps();
        let ctx = GuessContext::new(data.grid.steps(), &data.values, timestamps);
        let start = model.initial_guess(&ctx);

        let attempts = if model.is_multimodal() {
            1 + self.config.restarts
        } else {
            1
        };
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let first = self.optimize(model, data, &start, &box_bounds, deadline);
        let first_effective = effective_params(&first.x, &bounds);
        let mut best = (first, first_effective);
        for _ in 1..attempts {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            let x0 = perturb(&start, &bounds, &mut rng);
            let run = self.optimize(model, data, &x0, &box_bounds, deadline);
            let effective = effective_params(&run.x, &bounds);
            if compare_runs(&run, effective, &best.0, best.1) == Ordering::Less {
                best = (run, effective);
            }
        }
        let (run, _) = best;

        let fitted = model.evaluate_unchecked(&data.full_grid, &run.x);
        let mut residuals = vec![f64::NAN; fitted.len()];
        for (pos, &i) in data.indices.iter().enumerate() {
            residuals[i] = data.values[pos] - fitted[i];
        }
        let sse = if run.value.is_finite() {
            run.value
        } else {
            f64::INFINITY
        };
        let score =
            self.config
                .criterion
                .score(sse, data.n_obs(), model.n_params(), data.mean_square());

        if run.converged {
            debug!(
                model = model.name(),
                sse,
                score,
                iterations = run.iterations,
                "fit converged"
            );
        } else {
            warn!(
                model = model.name(),
                sse,
                iterations = run.iterations,
                termination = ?run.termination,
                "fit did not converge"
            );
        }

        FitResult::new(
            model,
            run.x,
            fitted,
            residuals,
            sse,
            data.n_obs(),
            score,
            run.converged,
            run.iterations,
            data.full_grid.origin(),
            data.cadence,
        )
    }

    fn optimize(
        &self,
        model: &CompositeModel,
        data: &FitData,
        x0: &[f64],
        bounds: &[(f64, f64)],
        deadline: Option<Instant>,
    ) -> OptimizationResult {
        match self.config.solver {
            Solver::LevenbergMarquardt => {
                let config = LeastSquaresConfig {
                    max_iter: self.config.max_iter,
                    ftol: self.config.ftol,
                    xtol: self.config.xtol,
                    gtol: self.config.gtol,
                    deadline,
                    ..Default::default()
                };
                levenberg_marquardt(
                    |p, out| data.weighted_residuals(model, p, out),
                    x0,
                    data.n_obs(),
                    Some(bounds),
                    &config,
                )
            }
            Solver::NelderMead => {
                let config = NelderMeadConfig {
                    max_iter: self.config.max_iter * (x0.len() + 1),
                    tolerance: self.config.ftol,
                    deadline,
                    ..Default::default()
                };
                nelder_mead(
                    |p| {
                        let mut r = vec![0.0; data.n_obs()];
                        data.weighted_residuals(model, p, &mut r);
                        r.iter().map(|v| v * v).sum()
                    },
                    x0,
                    Some(bounds),
                    &config,
                )
            }
        }
    }
}

/// Converged first, then lower SSE, then fewer effective parameters.
/// Earlier attempts win exact ties because only strictly better runs replace them.
fn compare_runs(
    a: &OptimizationResult,
    a_effective: usize,
    b: &OptimizationResult,
    b_effective: usize,
) -> Ordering {
    b.converged
        .cmp(&a.converged)
        .then_with(|| {
            let scale = a.value.abs().max(b.value.abs());
            if (a.value - b.value).abs() <= 1e-12 * scale {
                Ordering::Equal
            } else {
                a.value.total_cmp(&b.value)
            }
        })
        .then_with(|| a_effective.cmp(&b_effective))
}

/// Parameters strictly inside their bounds.
fn effective_params(x: &[f64], bounds: &[Bounds]) -> usize {
    x.iter()
        .zip(bounds)
        .filter(|(xi, b)| !b.is_active(**xi))
        .count()
}

/// Random start around `x0`: each coordinate moves by up to half its
/// magnitude (at least 0.5), then is clamped into its bounds.
fn perturb(x0: &[f64], bounds: &[Bounds], rng: &mut StdRng) -> Vec<f64> {
    x0.iter()
        .zip(bounds)
        .map(|(x, b)| {
            let u: f64 = rng.gen_range(-1.0..1.0);
            b.clamp(x + u * 0.5 * x.abs().max(1.0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelComponent, SeasonMode};
    use approx::assert_relative_eq;
    use chrono::{DateTime, TimeZone, Utc};

    fn daily(n: usize) -> Vec<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| base + chrono::Duration::days(i as i64)).collect()
    }

    fn series_from<F: Fn(f64) -> f64>(n: usize, f: F) -> TimeSeries {
        TimeSeries::new(daily(n), (0..n).map(|i| f(i as f64)).collect()).unwrap()
    }

    #[test]
    fn recovers_exact_linear_parameters() {
        let series = series_from(30, |t| 5.0 - 0.3 * t);
        let model = CompositeModel::new("linear", ModelComponent::linear());
        let fit = Fitter::default().fit(&model, &series, None).unwrap();

        assert!(fit.converged());
        assert_relative_eq!(fit.params()[0], 5.0, epsilon = 1e-6);
        assert_relative_eq!(fit.params()[1], -0.3, epsilon = 1e-8);
        assert!(fit.sse() < 1e-12);
    }

    #[test]
    fn recovers_exact_logistic_parameters() {
        let truth = [2.0, 12.0, 20.0, 0.4];
        let series = series_from(40, |t| {
            truth[0] + (truth[1] - truth[0]) / (1.0 + (-truth[3] * (t - truth[2])).exp())
        });
        let model = CompositeModel::new("logistic", ModelComponent::logistic());
        let fit = Fitter::default().fit(&model, &series, None).unwrap();

        assert!(fit.converged());
        for (p, t) in fit.params().iter().zip(truth) {
            assert_relative_eq!(*p, t, epsilon = 1e-4);
        }
    }

    #[test]
    fn recovers_exact_exponential_parameters() {
        let series = series_from(40, |t| 2.0 * (0.1 * t).exp());
        let model = CompositeModel::new("exponential", ModelComponent::exponential());
        let fit = Fitter::default().fit(&model, &series, None).unwrap();

        assert!(fit.converged());
        assert_relative_eq!(fit.params()[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(fit.params()[1], 0.1, epsilon = 1e-8);
        assert!(fit.sse() < 1e-10);
    }

    #[test]
    fn recovers_exact_log_parameters() {
        let series = series_from(30, |t| 3.0 + 2.0 * t.ln_1p());
        let model = CompositeModel::new("log", ModelComponent::logarithmic());
        let fit = Fitter::default().fit(&model, &series, None).unwrap();

        assert!(fit.converged());
        assert_relative_eq!(fit.params()[0], 3.0, epsilon = 1e-6);
        assert_relative_eq!(fit.params()[1], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn recovers_linear_plus_step() {
        let series = series_from(30, |t| 1.0 + 0.5 * t + if t >= 15.0 { 4.0 } else { 0.0 });
        let model = CompositeModel::new("linear+step", ModelComponent::linear())
            .add(ModelComponent::step(15.0));
        let fit = Fitter::default().fit(&model, &series, None).unwrap();

        assert!(fit.converged());
        assert_relative_eq!(fit.params()[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(fit.params()[1], 0.5, epsilon = 1e-7);
        assert_relative_eq!(fit.params()[2], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn recovers_multiplicative_weekday_pattern() {
        let factors = [1.0, 1.2, 1.1, 1.0, 0.9, 0.6, 0.5];
        let series = series_from(56, |t| (100.0 + 0.5 * t) * factors[t as usize % 7]);
        let model = CompositeModel::new("linear*weekday", ModelComponent::linear())
            .multiply(ModelComponent::weekday(SeasonMode::Multiplicative));
        let fit = Fitter::default().fit(&model, &series, None).unwrap();

        assert!(fit.converged());
        assert_relative_eq!(fit.params()[0], 100.0, epsilon = 1e-4);
        assert_relative_eq!(fit.params()[1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(fit.params()[2], 0.2, epsilon = 1e-6);
        assert_relative_eq!(fit.params()[7], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn missing_values_are_excluded_not_imputed() {
        let mut values: Vec<f64> = (0..10).map(|i| 1.0 + i as f64).collect();
        values[4] = f64::NAN;
        let series = TimeSeries::new(daily(10), values).unwrap();
        let model = CompositeModel::new("linear", ModelComponent::linear());
        let fit = Fitter::default().fit(&model, &series, None).unwrap();

        assert_eq!(fit.n_obs(), 9);
        assert_eq!(fit.n_params(), 2);
        assert!(fit.residuals()[4].is_nan());
        assert_relative_eq!(fit.fitted()[4], 5.0, epsilon = 1e-6);
    }

    #[test]
    fn zero_weights_exclude_points() {
        let mut values: Vec<f64> = (0..10).map(|i| i as f64).collect();
        values[9] = 1000.0;
        let series = TimeSeries::new(daily(10), values).unwrap();
        let mut weights = vec![1.0; 10];
        weights[9] = 0.0;

        let model = CompositeModel::new("linear", ModelComponent::linear());
        let fit = Fitter::default()
            .fit(&model, &series, Some(&weights))
            .unwrap();
        assert_eq!(fit.n_obs(), 9);
        assert_relative_eq!(fit.params()[1], 1.0, epsilon = 1e-8);

        let err = Fitter::default()
            .fit(&model, &series, Some(&[1.0, 2.0]))
            .unwrap_err();
        assert_eq!(
            err,
            ForecastError::DimensionMismatch {
                expected: 10,
                got: 2
            }
        );
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let series = series_from(40, |t| 1.0 + 10.0 / (1.0 + (-0.5 * (t - 25.0)).exp()));
        let model = CompositeModel::new("logistic", ModelComponent::logistic());
        let fitter = Fitter::new(FitConfig::default().with_max_iter(1).with_restarts(0));
        let fit = fitter.fit(&model, &series, None).unwrap();

        assert!(!fit.converged());
        assert!(fit.sse().is_finite());
    }

    #[test]
    fn exhausted_time_budget_returns_best_so_far() {
        let series = series_from(40, |t| 1.0 + 10.0 / (1.0 + (-0.5 * (t - 25.0)).exp()));
        let model = CompositeModel::new("logistic", ModelComponent::logistic());
        let fitter = Fitter::new(FitConfig::default().with_time_budget(Duration::ZERO));
        let fit = fitter.fit(&model, &series, None).unwrap();

        assert!(!fit.converged());
        assert_eq!(fit.params().len(), 4);
    }

    #[test]
    fn nelder_mead_solver_fits_linear_trend() {
        let series = series_from(20, |t| 2.0 + 0.5 * t);
        let model = CompositeModel::new("linear", ModelComponent::linear());
        let fitter = Fitter::new(FitConfig::default().with_solver(Solver::NelderMead));
        let fit = fitter.fit(&model, &series, None).unwrap();

        assert_relative_eq!(fit.params()[0], 2.0, epsilon = 1e-3);
        assert_relative_eq!(fit.params()[1], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn restarts_are_deterministic() {
        let series = series_from(30, |t| 3.0 + 5.0 / (1.0 + (-0.8 * (t - 12.0)).exp()) + 0.1 * (t * 1.7).sin());
        let model = CompositeModel::new("logistic", ModelComponent::logistic());
        let a = Fitter::default().fit(&model, &series, None).unwrap();
        let b = Fitter::default().fit(&model, &series, None).unwrap();
        assert_eq!(a.params(), b.params());
        assert_eq!(a.sse(), b.sse());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = FitConfig::default()
            .with_time_budget(Duration::from_millis(250))
            .with_criterion(InformationCriterion::Bic);
        let json = serde_json::to_string(&config).unwrap();
        let back: FitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let partial: FitConfig = serde_json::from_str(r#"{"restarts": 0}"#).unwrap();
        assert_eq!(partial.restarts, 0);
        assert_eq!(partial.max_iter, 200);
    }
}
