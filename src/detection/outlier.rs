//! Outlier detection against a robust local trend.
//!
//! Every point is compared with a Theil-Sen line through its `window`
//! nearest neighbours, the point itself left out; the line's value is also
//! the replacement. Curvature is not an anomaly: the deviation is first
//! reduced by an allowance proportional to the local second differences of
//! a median-smoothed copy of the series. A flagged point must also disagree
//! with lines fitted to each side of it alone, so points next to a level
//! shift are left to the step detector.

use std::ops::Range;

use crate::detection::{noise_sigma, second_differences, spread_floor};
use crate::utils::stats::{centered_median, median, robust_sigma, theil_sen};

/// Deviation allowed per unit of local curvature.
const CURVATURE_ALLOWANCE: f64 = 10.0;
/// Half-width of the median smoother the curvature is read from.
const SMOOTHING_HALF_WIDTH: usize = 2;
/// Curvature magnitudes at or above this rank (0 = largest) are trusted;
/// the larger ones may come from another outlier nearby.
const CURVATURE_RANK: usize = 3;
/// Noise margin, in standard deviations, subtracted from the curvature.
const CURVATURE_NOISE_MARGIN: f64 = 2.0;

/// Configuration for outlier detection.
#[derive(Debug, Clone)]
pub struct OutlierConfig {
    /// Points in the local trend window, the candidate included (odd; even widths are widened by one).
    pub window: usize,
    /// Deviation threshold in robust standard deviations.
    pub threshold: f64,
    /// Lower bound on the spread, relative to the series scale.
    pub relative_floor: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            window: 7,
            threshold: 3.5,
            relative_floor: 1e-6,
        }
    }
}

impl OutlierConfig {
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Result of outlier detection.
#[derive(Debug, Clone)]
pub struct OutlierResult {
    /// Indices of detected outliers, ascending.
    pub outlier_indices: Vec<usize>,
    /// Deviation of each point in robust standard deviations.
    pub scores: Vec<f64>,
    /// Local trend estimate at each point.
    pub local_level: Vec<f64>,
    /// Robust spread the scores are measured in.
    pub sigma: f64,
    pub threshold: f64,
}

impl OutlierResult {
    fn empty(n: usize, threshold: f64) -> Self {
        Self {
            outlier_indices: Vec::new(),
            scores: vec![0.0; n],
            local_level: Vec::new(),
            sigma: 0.0,
            threshold,
        }
    }

    pub fn outlier_count(&self) -> usize {
        self.outlier_indices.len()
    }

    pub fn is_outlier(&self, index: usize) -> bool {
        self.outlier_indices.binary_search(&index).is_ok()
    }

    /// Value to put in place of the point at `index`.
    pub fn replacement(&self, index: usize) -> Option<f64> {
        self.local_level.get(index).copied()
    }
}

/// Detect outliers among observed points.
///
/// `steps` are the points' time offsets (strictly increasing) and `values`
/// their finite values. Fewer than three points are never flagged.
pub fn detect_outliers(steps: &[f64], values: &[f64], config: &OutlierConfig) -> OutlierResult {
    let n = values.len().min(steps.len());
    if n < 3 {
        return OutlierResult::empty(n, config.threshold);
    }
    let (steps, values) = (&steps[..n], &values[..n]);
    let half = (config.window / 2).max(1);

    let local_level: Vec<f64> = (0..n)
        .map(|i| leave_one_out_level(steps, values, span(i, n, half), i))
        .collect();
    let deviation: Vec<f64> = values.iter().zip(&local_level).map(|(v, l)| v - l).collect();

    let raw_curvature = second_differences(steps, values);
    let smooth_curvature = second_differences(steps, &centered_median(values, SMOOTHING_HALF_WIDTH));
    let floor = spread_floor(values, config.relative_floor);
    // Third differences of white noise have variance 20·sigma².
    let third: Vec<f64> = raw_curvature.windows(2).map(|w| w[1] - w[0]).collect();
    let noise = if third.is_empty() {
        floor
    } else {
        (robust_sigma(&third) / 20.0_f64.sqrt()).max(floor)
    };
    let sigma = noise_sigma(&deviation)
        .max(robust_sigma(&raw_curvature) / 6.0_f64.sqrt())
        .max(floor);

    let scores: Vec<f64> = (0..n)
        .map(|i| {
            let allowance =
                curvature_allowance(steps, &smooth_curvature, span(i, n, 2 * half), i, noise);
            let centered = (deviation[i].abs() - allowance).max(0.0) / sigma;
            match one_sided_deviation(steps, values, i, 2 * half + 1, half) {
                Some(side) => centered.min(side / sigma),
                None => centered,
            }
        })
        .collect();

    let outlier_indices = scores
        .iter()
        .enumerate()
        .filter(|(_, &s)| s > config.threshold)
        .map(|(i, _)| i)
        .collect();

    OutlierResult {
        outlier_indices,
        scores,
        local_level,
        sigma,
        threshold: config.threshold,
    }
}

/// Window of up to `2 * half + 1` points around `i`, shifted inward at the edges.
fn span(i: usize, n: usize, half: usize) -> Range<usize> {
    let width = (2 * half + 1).min(n);
    let start = i.saturating_sub(half).min(n - width);
    start..start + width
}

fn leave_one_out_level(steps: &[f64], values: &[f64], span: Range<usize>, i: usize) -> f64 {
    let (xs, ys): (Vec<f64>, Vec<f64>) = span
        .filter(|&j| j != i)
        .map(|j| (steps[j], values[j]))
        .unzip();
    match theil_sen(&xs, &ys) {
        Some((intercept, slope)) => intercept + slope * steps[i],
        None => median(&ys),
    }
}

/// How far a smooth curve may stray from a straight line at point `i`.
///
/// Curvature is taken from points at least two away from `i`, so a spike
/// never excuses itself. Curvature of one sign that grows or decays
/// steadily is extrapolated geometrically to `i`; otherwise a high-ranking
/// magnitude in the window, net of noise, is used.
fn curvature_allowance(
    steps: &[f64],
    curvature: &[f64],
    span: Range<usize>,
    i: usize,
    noise: f64,
) -> f64 {
    let n = steps.len();
    let (xs, cs): (Vec<f64>, Vec<f64>) = span
        .filter(|&k| k >= 1 && k + 1 < n && k.abs_diff(i) > 1)
        .map(|k| (steps[k], curvature[k - 1]))
        .unzip();
    if cs.len() < 2 {
        return 0.0;
    }

    let mut allowance = 0.0_f64;
    if cs.iter().all(|c| *c > 0.0) || cs.iter().all(|c| *c < 0.0) {
        let logs: Vec<f64> = cs.iter().map(|c| c.abs().ln()).collect();
        if let Some((a, b)) = theil_sen(&xs, &logs) {
            let extrapolated = (a + b * steps[i]).exp();
            if extrapolated.is_finite() {
                allowance = extrapolated;
            }
        }
    }
    if cs.len() > CURVATURE_RANK {
        let mut magnitudes: Vec<f64> = cs.iter().map(|c| c.abs()).collect();
        magnitudes.sort_by(|a, b| b.total_cmp(a));
        let net = magnitudes[CURVATURE_RANK] - CURVATURE_NOISE_MARGIN * 6.0_f64.sqrt() * noise;
        allowance = allowance.max(net);
    }
    CURVATURE_ALLOWANCE * allowance
}

/// Smaller of the distances from `values[i]` to lines fitted on up to
/// `reach` points on either side. `None` unless both sides hold at least
/// `min_points` points.
fn one_sided_deviation(
    steps: &[f64],
    values: &[f64],
    i: usize,
    reach: usize,
    min_points: usize,
) -> Option<f64> {
    let left = i.saturating_sub(reach)..i;
    let right = i + 1..(i + 1 + reach).min(values.len());
    if left.len() < min_points || right.len() < min_points {
        return None;
    }
    let distance = |side: Range<usize>| {
        theil_sen(&steps[side.clone()], &values[side])
            .map(|(intercept, slope)| (values[i] - intercept - slope * steps[i]).abs())
    };
    Some(distance(left)?.min(distance(right)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn steps(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn flags_single_spike_on_a_line() {
        let t = steps(20);
        let mut values: Vec<f64> = t.iter().map(|x| 2.0 + 0.5 * x).collect();
        values[8] = 100.0;

        let result = detect_outliers(&t, &values, &OutlierConfig::default());
        assert_eq!(result.outlier_indices, vec![8]);
        assert!(result.is_outlier(8));
        assert_relative_eq!(result.replacement(8).unwrap(), 6.0, epsilon = 1e-9);
    }

    #[test]
    fn flags_spike_in_noisy_series() {
        let t = steps(40);
        let mut values: Vec<f64> = t
            .iter()
            .map(|x| 10.0 + 0.1 * x + 0.3 * (x * 2.3).sin())
            .collect();
        values[25] -= 8.0;

        let result = detect_outliers(&t, &values, &OutlierConfig::default());
        assert_eq!(result.outlier_indices, vec![25]);
        let replacement = result.replacement(25).unwrap();
        assert!((replacement - (10.0 + 2.5)).abs() < 1.0);
    }

    #[test]
    fn clean_line_has_no_outliers() {
        let t = steps(15);
        let values: Vec<f64> = t.iter().map(|x| 1.0 + x).collect();
        let result = detect_outliers(&t, &values, &OutlierConfig::default());
        assert_eq!(result.outlier_count(), 0);
    }

    #[test]
    fn irregular_spacing_uses_time_offsets() {
        let t = vec![0.0, 1.0, 2.0, 5.0, 6.0, 7.0, 8.0, 11.0, 12.0, 13.0];
        let values: Vec<f64> = t.iter().map(|x| 3.0 * x).collect();
        let result = detect_outliers(&t, &values, &OutlierConfig::default());
        assert_eq!(result.outlier_count(), 0);
    }

    #[test]
    fn smooth_curves_are_not_outliers() {
        let t = steps(40);
        let curves: [(&str, fn(f64) -> f64); 5] = [
            ("exponential", |x| 2.0 * (0.1 * x).exp()),
            ("fast exponential", |x| (0.2 * x).exp()),
            ("square", |x| x * x),
            ("logistic", |x| 1.0 + 10.0 / (1.0 + (-0.5 * (x - 20.0)).exp())),
            ("log", |x| 3.0 + 2.0 * x.ln_1p()),
        ];
        for (name, f) in curves {
            let values: Vec<f64> = t.iter().map(|x| f(*x)).collect();
            let result = detect_outliers(&t, &values, &OutlierConfig::default());
            assert_eq!(result.outlier_count(), 0, "{name}: {:?}", result.outlier_indices);
        }
    }

    #[test]
    fn points_beside_a_level_shift_are_not_outliers() {
        let t = steps(30);
        let values: Vec<f64> = (0..30).map(|i| if i < 15 { 3.0 } else { 9.0 }).collect();
        let result = detect_outliers(&t, &values, &OutlierConfig::default());
        assert_eq!(result.outlier_count(), 0);
    }

    #[test]
    fn adjacent_spikes_are_both_flagged() {
        let t = steps(30);
        let mut values: Vec<f64> = t.iter().map(|x| 5.0 + x).collect();
        values[12] = 200.0;
        values[13] = 210.0;

        let result = detect_outliers(&t, &values, &OutlierConfig::default());
        assert_eq!(result.outlier_indices, vec![12, 13]);
        assert_relative_eq!(result.replacement(12).unwrap(), 17.0, epsilon = 1e-9);
        assert_relative_eq!(result.replacement(13).unwrap(), 18.0, epsilon = 1e-9);
    }

    #[test]
    fn too_few_points_are_never_flagged() {
        let result = detect_outliers(&[0.0, 1.0], &[0.0, 1000.0], &OutlierConfig::default());
        assert_eq!(result.outlier_count(), 0);
        assert_eq!(result.scores.len(), 2);
    }
}
