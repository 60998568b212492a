//! Akaike-weighted combination of ranked fits.

use crate::fitting::FitResult;
use chrono::{DateTime, Utc};

/// Akaike weights `exp(-Δ/2) / Σ exp(-Δ/2)` with `Δ` the distance to the best score.
///
/// Non-finite scores get zero weight. If no score is finite the weights are equal.
pub fn akaike_weights(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let best = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(f64::INFINITY, f64::min);
    if !best.is_finite() {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }

    let raw: Vec<f64> = scores
        .iter()
        .map(|s| {
            if s.is_finite() {
                (-(s - best) / 2.0).exp()
            } else {
                0.0
            }
        })
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Weighted average of several fits.
#[derive(Debug, Clone)]
pub struct Ensemble<'a, 'm> {
    members: Vec<(&'a FitResult<'m>, f64)>,
}

impl<'a, 'm> Ensemble<'a, 'm> {
    /// Combine the first `top_k` converged, finitely scored fits of a ranked list.
    ///
    /// Returns `None` when fewer than two fits qualify.
    pub fn from_ranked(ranked: &'a [FitResult<'m>], top_k: usize) -> Option<Self> {
        let chosen: Vec<&'a FitResult<'m>> = ranked
            .iter()
            .filter(|f| f.converged() && f.score().is_finite())
            .take(top_k)
            .collect();
        if chosen.len() < 2 {
            return None;
        }
        let scores: Vec<f64> = chosen.iter().map(|f| f.score()).collect();
        let weights = akaike_weights(&scores);
        Some(Self {
            members: chosen.into_iter().zip(weights).collect(),
        })
    }

    pub fn members(&self) -> &[(&'a FitResult<'m>, f64)] {
        &self.members
    }

    /// Weighted prediction at `timestamps`.
    pub fn predict(&self, timestamps: &[DateTime<Utc>]) -> Vec<f64> {
        self.combine(|fit| fit.predict(timestamps))
    }

    /// Weighted in-sample values.
    pub fn fitted(&self) -> Vec<f64> {
        self.combine(|fit| fit.fitted().to_vec())
    }

    /// Residuals of the weighted in-sample values; NaN where any member has none.
    pub fn residuals(&self) -> Vec<f64> {
        self.combine(|fit| fit.residuals().to_vec())
    }

    fn combine<F>(&self, values: F) -> Vec<f64>
    where
        F: Fn(&FitResult<'m>) -> Vec<f64>,
    {
        let mut out: Vec<f64> = Vec::new();
        for (fit, weight) in &self.members {
            let v = values(*fit);
            if out.is_empty() {
                out = vec![0.0; v.len()];
            }
            for (o, x) in out.iter_mut().zip(v) {
                *o += weight * x;
            }
        }
        out
    }
}
