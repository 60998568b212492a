//! Detection utilities for time series cleaning.
//!
//! This module provides tools for detecting:
//! - Outliers against a robust local trend
//! - Persistent level shifts (step changes)
//!
//! Both detectors take the time offsets of the observed points alongside
//! their values, so gaps in an irregular series are not mistaken for jumps.

mod level_shift;
mod outlier;

pub use level_shift::{detect_level_shifts, LevelShift, LevelShiftConfig};
pub use outlier::{detect_outliers, OutlierConfig, OutlierResult};

use crate::utils::stats::{median, robust_sigma};

/// Robust spread of `values`.
///
/// Scaled MAD, or the scaled mean absolute deviation from the median when
/// more than half of the values coincide and the MAD collapses to zero.
pub(crate) fn noise_sigma(values: &[f64]) -> f64 {
    let sigma = robust_sigma(values);
    if sigma > 0.0 || values.is_empty() {
        return sigma;
    }
    let m = median(values);
    let mean_abs = values.iter().map(|v| (v - m).abs()).sum::<f64>() / values.len() as f64;
    mean_abs * std::f64::consts::FRAC_PI_2.sqrt()
}

/// Smallest spread a detector may use: `relative` times the series scale.
///
/// The scale is the larger of the median magnitude and the robust spread of
/// the values, or 1 when both are zero.
pub(crate) fn spread_floor(values: &[f64], relative: f64) -> f64 {
    let magnitudes: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    let scale = median(&magnitudes).max(robust_sigma(values));
    let scale = if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    };
    relative * scale
}

/// Second divided differences at the interior points, expressed in value
/// units over one typical (median) step. Entry `k` belongs to point `k + 1`.
pub(crate) fn second_differences(steps: &[f64], values: &[f64]) -> Vec<f64> {
    let n = steps.len().min(values.len());
    if n < 3 {
        return Vec::new();
    }
    let gaps: Vec<f64> = steps[..n].windows(2).map(|w| w[1] - w[0]).collect();
    let typical = median(&gaps);
    (1..n - 1)
        .map(|k| {
            let right = (values[k + 1] - values[k]) / gaps[k];
            let left = (values[k] - values[k - 1]) / gaps[k - 1];
            2.0 * (right - left) / (steps[k + 1] - steps[k - 1]) * typical * typical
        })
        .collect()
}
