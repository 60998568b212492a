//! Bounded optimizers used for parameter estimation.
//!
//! - [`levenberg_marquardt`]: derivative-based nonlinear least squares with
//!   forward-difference Jacobians, Marquardt diagonal scaling, Nielsen damping
//!   updates and projection onto box bounds. This is the default fitting method.
//! - [`nelder_mead`]: derivative-free simplex search on a scalar objective,
//!   with the same projection onto bounds.
//!
//! Both stop on an iteration cap or an optional wall-clock deadline and then
//! report their best point with `converged = false`.

use crate::utils::linalg::{damped_step, normal_equations, MIN_CURVATURE};
use std::time::Instant;

/// Why an optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A tolerance was met.
    Converged,
    /// The iteration cap was reached.
    MaxIterations,
    /// The wall-clock deadline passed.
    Budget,
    /// The objective was not finite at the starting point.
    NonFinite,
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective at `x` (sum of squared residuals for least squares).
    pub value: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Number of objective/residual evaluations.
    pub evaluations: usize,
    /// Whether a tolerance was met.
    pub converged: bool,
    pub termination: Termination,
}

impl OptimizationResult {
    fn finish(
        x: Vec<f64>,
        value: f64,
        iterations: usize,
        evaluations: usize,
        termination: Termination,
    ) -> Self {
        Self {
            x,
            value,
            iterations,
            evaluations,
            converged: termination == Termination::Converged,
            termination,
        }
    }
}

/// Configuration for Levenberg-Marquardt least squares.
#[derive(Debug, Clone)]
pub struct LeastSquaresConfig {
    /// Maximum number of outer iterations (Jacobian evaluations).
    pub max_iter: usize,
    /// Stop when an accepted step reduces the cost by less than `ftol * cost`.
    pub ftol: f64,
    /// Stop when a step changes the parameters by less than `xtol * (|x| + xtol)`.
    pub xtol: f64,
    /// Stop when the projected gradient's largest entry falls below `gtol`.
    pub gtol: f64,
    /// Initial damping relative to the largest diagonal entry of `J'J`.
    pub initial_damping: f64,
    /// Give up (unconverged) after this instant.
    pub deadline: Option<Instant>,
}

impl Default for LeastSquaresConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_damping: 1e-3,
            deadline: None,
        }
    }
}

/// Minimize `sum(r_i(x)^2)` subject to box bounds.
///
/// `residuals(x, out)` writes the `n_residuals` residuals at `x` into `out`.
/// Non-finite residual sums are treated as infinitely bad steps.
///
/// # Example
/// ```
/// use anofox_anticipate::utils::optimization::{levenberg_marquardt, LeastSquaresConfig};
///
/// // Fit y = a + b*x to three points on the line y = 1 + 2x
/// let xs = [0.0, 1.0, 2.0];
/// let ys = [1.0, 3.0, 5.0];
/// let result = levenberg_marquardt(
///     |p, out| {
///         for i in 0..3 {
///             out[i] = p[0] + p[1] * xs[i] - ys[i];
///         }
///     },
///     &[0.0, 0.0],
///     3,
///     None,
///     &LeastSquaresConfig::default(),
/// );
///
/// assert!(result.converged);
/// assert!((result.x[0] - 1.0).abs() < 1e-6);
/// assert!((result.x[1] - 2.0).abs() < 1e-6);
/// ```
pub fn levenberg_marquardt<F>(
    residuals: F,
    initial: &[f64],
    n_residuals: usize,
    bounds: Option<&[(f64, f64)]>,
    config: &LeastSquaresConfig,
) -> OptimizationResult
where
    F: Fn(&[f64], &mut [f64]),
{
    let k = initial.len();
    let m = n_residuals;

    let mut x = apply_bounds(initial, bounds);
    let mut r = vec![0.0; m];
    residuals(&x, &mut r);
    let mut evaluations = 1;
    let mut cost = sum_of_squares(&r);

    if !cost.is_finite() {
        return OptimizationResult::finish(x, f64::INFINITY, 0, evaluations, Termination::NonFinite);
    }
    if k == 0 || m == 0 {
        return OptimizationResult::finish(x, cost, 0, evaluations, Termination::Converged);
    }

    let mut jac = vec![vec![0.0; m]; k];
    let mut r_trial = vec![0.0; m];
    let mut damping: Option<f64> = None;
    let mut nu = 2.0;
    let mut iterations = 0;
    let mut termination = Termination::MaxIterations;

    'outer: while iterations < config.max_iter {
        if past_deadline(config.deadline) {
            termination = Termination::Budget;
            break;
        }
        iterations += 1;

        forward_difference_jacobian(&residuals, &x, &r, bounds, &mut jac);
        evaluations += k;
        let (jtj, jtr) = normal_equations(&jac, &r);

        if projected_gradient_norm(&x, &jtr, bounds) <= config.gtol {
            termination = Termination::Converged;
            break;
        }

        let max_diag = (0..k).map(|i| jtj[i][i]).fold(0.0, f64::max).max(MIN_CURVATURE);
        let lambda = damping.get_or_insert(config.initial_damping * max_diag);

        loop {
            let Some(delta) = damped_step(&jtj, &jtr, *lambda) else {
                *lambda *= nu;
                nu *= 2.0;
                if !lambda.is_finite() || *lambda > 1e300 {
                    termination = Termination::Converged;
                    break 'outer;
                }
                continue;
            };

            let trial: Vec<f64> = apply_bounds(
                &x.iter().zip(&delta).map(|(xi, di)| xi + di).collect::<Vec<_>>(),
                bounds,
            );
            let step: Vec<f64> = trial.iter().zip(&x).map(|(t, xi)| t - xi).collect();
            let step_norm = norm(&step);
            let small_step = step_norm <= config.xtol * (norm(&x) + config.xtol);

            residuals(&trial, &mut r_trial);
            evaluations += 1;
            let trial_cost = sum_of_squares(&r_trial);

            if trial_cost < cost {
                let reduction = cost - trial_cost;
                let predicted = predicted_reduction(&step, &jtj, &jtr);
                let rho = if predicted > 0.0 {
                    reduction / predicted
                } else {
                    1.0
                };
                *lambda *= (1.0 - (2.0 * rho - 1.0).powi(3)).max(1.0 / 3.0);
                nu = 2.0;

                let previous = cost;
                x = trial;
                std::mem::swap(&mut r, &mut r_trial);
                cost = trial_cost;

                if cost == 0.0 || reduction <= config.ftol * previous || small_step {
                    termination = Termination::Converged;
                    break 'outer;
                }
                continue 'outer;
            }

            if small_step {
                termination = Termination::Converged;
                break 'outer;
            }
            *lambda *= nu;
            nu *= 2.0;
            if !lambda.is_finite() || *lambda > 1e300 {
                termination = Termination::Converged;
                break 'outer;
            }
            if past_deadline(config.deadline) {
                termination = Termination::Budget;
                break 'outer;
            }
        }
    }

    OptimizationResult::finish(x, cost, iterations, evaluations, termination)
}

/// Configuration for Nelder-Mead optimization.
#[derive(Debug, Clone)]
pub struct NelderMeadConfig {
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the spread of simplex values and vertices.
    pub tolerance: f64,
    /// Reflection coefficient (default: 1.0).
    pub alpha: f64,
    /// Expansion coefficient (default: 2.0).
    pub gamma: f64,
    /// Contraction coefficient (default: 0.5).
    pub rho: f64,
    /// Shrinkage coefficient (default: 0.5).
    pub sigma: f64,
    /// Initial simplex step relative to each coordinate (default: 0.05).
    pub initial_step: f64,
    /// Give up (unconverged) after this instant.
    pub deadline: Option<Instant>,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tolerance: 1e-10,
            alpha: 1.0,
            gamma: 2.0,
            rho: 0.5,
            sigma: 0.5,
            initial_step: 0.05,
            deadline: None,
        }
    }
}

/// Minimize a scalar objective with the Nelder-Mead simplex method.
///
/// Non-finite objective values are treated as `+inf`.
pub fn nelder_mead<F>(
    objective: F,
    initial: &[f64],
    bounds: Option<&[(f64, f64)]>,
    config: &NelderMeadConfig,
) -> OptimizationResult
where
    F: Fn(&[f64]) -> f64,
{
    let n = initial.len();
    let eval = |p: &[f64]| {
        let v = objective(p);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };

    let start = apply_bounds(initial, bounds);
    let start_value = eval(&start);
    if n == 0 {
        return OptimizationResult::finish(start, start_value, 0, 1, Termination::Converged);
    }
    if !start_value.is_finite() {
        return OptimizationResult::finish(start, start_value, 0, 1, Termination::NonFinite);
    }

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(start);
    for i in 0..n {
        let mut vertex = simplex[0].clone();
        let step = if vertex[i].abs() > 1e-10 {
            config.initial_step * vertex[i].abs()
        } else {
            config.initial_step
        };
        vertex[i] += step;
        // Step the other way if the bound swallowed the move.
        let mut vertex = apply_bounds(&vertex, bounds);
        if vertex[i] == simplex[0][i] {
            vertex[i] -= step;
            vertex = apply_bounds(&vertex, bounds);
        }
        simplex.push(vertex);
    }

    let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();
    let mut evaluations = n + 1;
    let mut iterations = 0;
    let mut termination = Termination::MaxIterations;

    while iterations < config.max_iter {
        if past_deadline(config.deadline) {
            termination = Termination::Budget;
            break;
        }
        iterations += 1;

        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let best = order[0];
        let worst = order[n];
        let second_worst = order[n - 1];

        let centroid = centroid_without(&simplex, worst);
        let spread = values[worst] - values[best];
        let radius = simplex
            .iter()
            .map(|v| distance(v, &centroid))
            .fold(0.0, f64::max);
        if spread <= config.tolerance * (1.0 + values[best].abs()) || radius < config.tolerance {
            termination = Termination::Converged;
            break;
        }

        let reflected = apply_bounds(&towards(&centroid, &simplex[worst], -config.alpha), bounds);
        let reflected_value = eval(&reflected);
        evaluations += 1;

        if reflected_value < values[best] {
            let expanded = apply_bounds(&towards(&centroid, &reflected, config.gamma), bounds);
            let expanded_value = eval(&expanded);
            evaluations += 1;
            if expanded_value < reflected_value {
                simplex[worst] = expanded;
                values[worst] = expanded_value;
            } else {
                simplex[worst] = reflected;
                values[worst] = reflected_value;
            }
            continue;
        }

        if reflected_value < values[second_worst] {
            simplex[worst] = reflected;
            values[worst] = reflected_value;
            continue;
        }

        let (target, target_value) = if reflected_value < values[worst] {
            (reflected.clone(), reflected_value)
        } else {
            (simplex[worst].clone(), values[worst])
        };
        let contracted = apply_bounds(&towards(&centroid, &target, config.rho), bounds);
        let contracted_value = eval(&contracted);
        evaluations += 1;
        if contracted_value < target_value {
            simplex[worst] = contracted;
            values[worst] = contracted_value;
            continue;
        }

        let anchor = simplex[best].clone();
        for i in 0..=n {
            if i != best {
                let shrunk = towards(&anchor, &simplex[i], config.sigma);
                simplex[i] = apply_bounds(&shrunk, bounds);
                values[i] = eval(&simplex[i]);
                evaluations += 1;
            }
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);
    OptimizationResult::finish(
        simplex[best].clone(),
        values[best],
        iterations,
        evaluations,
        termination,
    )
}

fn past_deadline(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn sum_of_squares(r: &[f64]) -> f64 {
    let s: f64 = r.iter().map(|v| v * v).sum();
    if s.is_finite() {
        s
    } else {
        f64::INFINITY
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Reduction of `|r|^2` predicted by the linear model for `step`.
fn predicted_reduction(step: &[f64], jtj: &[Vec<f64>], jtr: &[f64]) -> f64 {
    let k = step.len();
    let mut quad = 0.0;
    for i in 0..k {
        for j in 0..k {
            quad += step[i] * jtj[i][j] * step[j];
        }
    }
    let lin: f64 = step.iter().zip(jtr).map(|(s, g)| s * g).sum();
    -(2.0 * lin + quad)
}

/// Largest gradient entry that is free to move the point inside the bounds.
fn projected_gradient_norm(x: &[f64], gradient: &[f64], bounds: Option<&[(f64, f64)]>) -> f64 {
    x.iter()
        .zip(gradient)
        .enumerate()
        .filter(|&(i, (&xi, &g))| match bounds.and_then(|b| b.get(i)) {
            Some(&(lo, hi)) => !((xi <= lo && g > 0.0) || (xi >= hi && g < 0.0)),
            None => true,
        })
        .map(|(_, (_, g))| g.abs())
        .fold(0.0, f64::max)
}

/// Forward differences, switching to a backward step at an upper bound.
fn forward_difference_jacobian<F>(
    residuals: &F,
    x: &[f64],
    r: &[f64],
    bounds: Option<&[(f64, f64)]>,
    jac: &mut [Vec<f64>],
) where
    F: Fn(&[f64], &mut [f64]),
{
    let sqrt_eps = f64::EPSILON.sqrt();
    let mut shifted = x.to_vec();
    let mut r_shifted = vec![0.0; r.len()];

    for j in 0..x.len() {
        let mut h = sqrt_eps * x[j].abs().max(1.0);
        if let Some(&(_, hi)) = bounds.and_then(|b| b.get(j)) {
            if x[j] + h > hi {
                h = -h;
            }
        }
        shifted[j] = x[j] + h;
        residuals(&shifted, &mut r_shifted);
        for (i, column) in jac[j].iter_mut().enumerate() {
            let d = (r_shifted[i] - r[i]) / h;
            *column = if d.is_finite() { d } else { 0.0 };
        }
        shifted[j] = x[j];
    }
}

fn centroid_without(simplex: &[Vec<f64>], exclude: usize) -> Vec<f64> {
    let n = simplex[0].len();
    let count = (simplex.len() - 1) as f64;
    let mut centroid = vec![0.0; n];
    for (i, vertex) in simplex.iter().enumerate() {
        if i != exclude {
            for j in 0..n {
                centroid[j] += vertex[j];
            }
        }
    }
    centroid.iter_mut().for_each(|c| *c /= count);
    centroid
}

/// `from + t * (to - from)`.
fn towards(from: &[f64], to: &[f64], t: f64) -> Vec<f64> {
    from.iter().zip(to).map(|(f, p)| f + t * (p - f)).collect()
}

fn apply_bounds(point: &[f64], bounds: Option<&[(f64, f64)]>) -> Vec<f64> {
    match bounds {
        None => point.to_vec(),
        Some(b) => point
            .iter()
            .enumerate()
            .map(|(i, &x)| match b.get(i) {
                Some(&(lo, hi)) => x.clamp(lo, hi),
                None => x,
            })
            .collect(),
    }
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn exponential_residuals<'a>(xs: &'a [f64], ys: &'a [f64]) -> impl Fn(&[f64], &mut [f64]) + 'a {
        move |p, out| {
            for i in 0..xs.len() {
                out[i] = p[0] * (p[1] * xs[i]).exp() - ys[i];
            }
        }
    }

    #[test]
    fn levenberg_marquardt_fits_exponential_exactly() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * (0.1 * x).exp()).collect();

        let result = levenberg_marquardt(
            exponential_residuals(&xs, &ys),
            &[1.0, 0.0],
            xs.len(),
            None,
            &LeastSquaresConfig::default(),
        );

        assert!(result.converged);
        assert_relative_eq!(result.x[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(result.x[1], 0.1, epsilon = 1e-8);
        assert!(result.value < 1e-12);
    }

    #[test]
    fn levenberg_marquardt_respects_bounds() {
        // Unconstrained optimum of (x-5)^2 is 5; the box stops it at 3.
        let result = levenberg_marquardt(
            |p, out| out[0] = p[0] - 5.0,
            &[1.0],
            1,
            Some(&[(0.0, 3.0)]),
            &LeastSquaresConfig::default(),
        );

        assert!(result.converged);
        assert_relative_eq!(result.x[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(result.value, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn levenberg_marquardt_stops_at_iteration_cap() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * (0.1 * x).exp()).collect();
        let config = LeastSquaresConfig {
            max_iter: 1,
            ..Default::default()
        };

        let result =
            levenberg_marquardt(exponential_residuals(&xs, &ys), &[1.0, 0.0], 20, None, &config);

        assert!(!result.converged);
        assert_eq!(result.termination, Termination::MaxIterations);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn levenberg_marquardt_honours_expired_deadline() {
        let config = LeastSquaresConfig {
            deadline: Some(Instant::now() - Duration::from_millis(1)),
            ..Default::default()
        };
        let result = levenberg_marquardt(|p, out| out[0] = p[0] - 1.0, &[0.0], 1, None, &config);

        assert!(!result.converged);
        assert_eq!(result.termination, Termination::Budget);
        assert_eq!(result.x, vec![0.0]);
    }

    #[test]
    fn levenberg_marquardt_reports_non_finite_start() {
        let result = levenberg_marquardt(
            |_, out| out[0] = f64::NAN,
            &[0.0],
            1,
            None,
            &LeastSquaresConfig::default(),
        );
        assert_eq!(result.termination, Termination::NonFinite);
        assert!(!result.converged);
    }

    #[test]
    fn nelder_mead_quadratic_2d() {
        let result = nelder_mead(
            |x| (x[0] - 2.0).powi(2) + (x[1] - 3.0).powi(2),
            &[0.0, 0.0],
            None,
            &NelderMeadConfig::default(),
        );

        assert!(result.converged);
        assert_relative_eq!(result.x[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.x[1], 3.0, epsilon = 1e-4);
    }

    #[test]
    fn nelder_mead_with_bounds() {
        let result = nelder_mead(
            |x| (x[0] - 5.0).powi(2),
            &[1.0],
            Some(&[(0.0, 3.0)]),
            &NelderMeadConfig::default(),
        );

        assert_relative_eq!(result.x[0], 3.0, epsilon = 1e-4);
    }

    #[test]
    fn nelder_mead_rosenbrock() {
        let config = NelderMeadConfig {
            max_iter: 5000,
            tolerance: 1e-12,
            ..Default::default()
        };
        let result = nelder_mead(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2),
            &[0.0, 0.0],
            None,
            &config,
        );

        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn nelder_mead_treats_nan_as_worst() {
        let result = nelder_mead(
            |x| if x[0] < 0.0 { f64::NAN } else { (x[0] - 1.0).powi(2) },
            &[0.5],
            None,
            &NelderMeadConfig::default(),
        );
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-3);
    }
}
