//! Information criteria and the ranking order of fitted models.

use crate::fitting::FitResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Score that trades residual error against parameter count. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InformationCriterion {
    /// Akaike Information Criterion
    Aic,
    /// Corrected Akaike Information Criterion
    #[default]
    Aicc,
    /// Bayesian Information Criterion
    Bic,
}

impl InformationCriterion {
    /// Score a least-squares fit of `k` parameters to `n` points.
    ///
    /// The error variance `sse / n` is floored at `EPSILON * max(1, mean_square)`
    /// so exact fits get a large finite bonus instead of `-inf`. AICc is `+inf`
    /// when `n <= k + 1`.
    pub fn score(&self, sse: f64, n: usize, k: usize, mean_square: f64) -> f64 {
        if n == 0 || !sse.is_finite() {
            return f64::INFINITY;
        }
        let nf = n as f64;
        let kf = k as f64;
        let floor = f64::EPSILON * mean_square.max(1.0);
        let log_likelihood_term = nf * (sse / nf).max(floor).ln();

        match self {
            InformationCriterion::Aic => log_likelihood_term + 2.0 * kf,
            InformationCriterion::Aicc => {
                if n <= k + 1 {
                    f64::INFINITY
                } else {
                    log_likelihood_term + 2.0 * kf + 2.0 * kf * (kf + 1.0) / (nf - kf - 1.0)
                }
            }
            InformationCriterion::Bic => log_likelihood_term + kf * nf.ln(),
        }
    }
}

/// Preference order between two fits.
///
/// Converged fits come first, then lower score (NaN counts as `+inf`), then
/// fewer parameters. Remaining ties keep catalog order, which callers get by
/// sorting stably.
pub fn compare_fits(a: &FitResult<'_>, b: &FitResult<'_>) -> Ordering {
    let key = |s: f64| if s.is_nan() { f64::INFINITY } else { s };
    b.converged()
        .cmp(&a.converged())
        .then_with(|| key(a.score()).total_cmp(&key(b.score())))
        .then_with(|| a.n_params().cmp(&b.n_params()))
}

/// Sort fits into preference order, keeping catalog order among equals.
pub fn rank_fits(fits: &mut [FitResult<'_>]) {
    fits.sort_by(compare_fits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn aicc_adds_small_sample_correction() {
        let aic = InformationCriterion::Aic.score(10.0, 20, 3, 1.0);
        let aicc = InformationCriterion::Aicc.score(10.0, 20, 3, 1.0);
        assert_relative_eq!(aic, 20.0 * 0.5_f64.ln() + 6.0, epsilon = 1e-12);
        assert_relative_eq!(aicc - aic, 24.0 / 16.0, epsilon = 1e-12);

        let bic = InformationCriterion::Bic.score(10.0, 20, 3, 1.0);
        assert_relative_eq!(bic, 20.0 * 0.5_f64.ln() + 3.0 * 20.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn aicc_is_infinite_without_spare_degrees_of_freedom() {
        assert!(InformationCriterion::Aicc.score(1.0, 3, 2, 1.0).is_infinite());
        assert!(InformationCriterion::Aicc.score(1.0, 4, 2, 1.0).is_finite());
        assert!(InformationCriterion::Aic.score(f64::NAN, 4, 2, 1.0).is_infinite());
        assert!(InformationCriterion::Aic.score(1.0, 0, 0, 1.0).is_infinite());
    }

    #[test]
    fn exact_fits_are_floored_not_negative_infinity() {
        let perfect = InformationCriterion::Aicc.score(0.0, 5, 2, 6.0);
        assert!(perfect.is_finite());
        let flat = InformationCriterion::Aicc.score(10.0, 5, 1, 6.0);
        assert!(perfect < flat);
    }

    #[test]
    fn criterion_deserializes_from_snake_case() {
        let c: InformationCriterion = serde_json::from_str("\"bic\"").unwrap();
        assert_eq!(c, InformationCriterion::Bic);
    }
}
