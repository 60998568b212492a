//! Statistical utility functions.
//!
//! All functions expect finite inputs; callers filter missing values first.

/// Scale factor turning a median absolute deviation into a normal-consistent sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Calculate the mean of a slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Calculate the median of a slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n.is_multiple_of(2) {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median absolute deviation from the median.
pub fn mad(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = median(values);
    let deviations: Vec<f64> = values.iter().map(|x| (x - m).abs()).collect();
    median(&deviations)
}

/// Robust estimate of the standard deviation (scaled MAD).
pub fn robust_sigma(values: &[f64]) -> f64 {
    MAD_TO_SIGMA * mad(values)
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// `p` is clamped to `[0, 1]`.
pub fn quantile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

/// Centered rolling median with up to `half` points on each side.
///
/// Near the edges the window narrows symmetrically, so monotone sequences
/// pass through unchanged.
pub fn centered_median(values: &[f64], half: usize) -> Vec<f64> {
    let n = values.len();
    (0..n)
        .map(|i| {
            let reach = half.min(i).min(n - 1 - i);
            median(&values[i - reach..=i + reach])
        })
        .collect()
}

/// Theil-Sen line through `(x, y)`, returned as `(intercept, slope)`.
///
/// The slope is the median of the pairwise slopes and the intercept the
/// median of `y - slope·x`. Returns `None` when no two points differ in `x`.
pub fn theil_sen(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    let mut slopes = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in i + 1..n {
            let dx = x[j] - x[i];
            if dx != 0.0 {
                slopes.push((y[j] - y[i]) / dx);
            }
        }
    }
    if slopes.is_empty() {
        return None;
    }
    let slope = median(&slopes);
    let offsets: Vec<f64> = x[..n].iter().zip(&y[..n]).map(|(a, b)| b - slope * a).collect();
    Some((median(&offsets), slope))
}

/// Ordinary least squares line through `(x, y)`, returned as `(intercept, slope)`.
///
/// Returns `None` when fewer than two points are given or `x` is constant.
pub fn simple_regression(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        sxx += (x[i] - mx).powi(2);
        sxy += (x[i] - mx) * (y[i] - my);
    }
    if sxx <= f64::EPSILON * (1.0 + mx.abs()) {
        return None;
    }
    let slope = sxy / sxx;
    Some((my - slope * mx, slope))
}
