//! Level-shift (step change) detection.
//!
//! A level shift is a jump in the rate of change that stands out from the
//! differences right next to it and persists: the median level of the
//! `window` points after the jump must differ from the median level of the
//! `window` points before it (after removing the local trend over the time
//! between them) by a similar amount. Single-point spikes produce a jump
//! that is immediately undone, and smooth transitions spread their change
//! over several differences; both are rejected.
//!
//! Rates are measured per unit of time, so a gap in an irregular series is
//! not a jump. The confirmation windows and the minimum spacing between
//! accepted shifts still count points, not time.

use crate::detection::{noise_sigma, spread_floor};
use crate::utils::stats::median;

/// Configuration for level-shift detection.
#[derive(Debug, Clone)]
pub struct LevelShiftConfig {
    /// Points on each side of a candidate used to confirm persistence.
    pub window: usize,
    /// Jump threshold in robust standard deviations of the differences.
    pub threshold: f64,
    /// Lower bound on the spread, relative to the series scale.
    pub relative_floor: f64,
}

impl Default for LevelShiftConfig {
    fn default() -> Self {
        Self {
            window: 5,
            threshold: 4.0,
            relative_floor: 1e-6,
        }
    }
}

/// An accepted level shift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelShift {
    /// Index of the first point at the new level.
    pub index: usize,
    /// Size of the jump between `index - 1` and `index`, net of the local trend.
    pub jump: f64,
    /// Persistent change in level across the confirmation windows.
    pub shift: f64,
}

/// Detect level shifts among observed points.
///
/// `steps` are the points' time offsets (strictly increasing) and `values`
/// their finite values. Needs at least `2 * window` points; shorter input
/// yields nothing.
pub fn detect_level_shifts(
    steps: &[f64],
    values: &[f64],
    config: &LevelShiftConfig,
) -> Vec<LevelShift> {
    let n = values.len().min(steps.len());
    let w = config.window.max(1);
    if n < 2 * w {
        return Vec::new();
    }
    let (steps, values) = (&steps[..n], &values[..n]);

    let differences: Vec<f64> = values.windows(2).map(|p| p[1] - p[0]).collect();
    let gaps: Vec<f64> = steps.windows(2).map(|p| p[1] - p[0]).collect();
    let rates: Vec<f64> = differences.iter().zip(&gaps).map(|(d, g)| d / g).collect();
    let m = rates.len();

    // Typical rate around each difference, leaving the difference itself out.
    let width = (2 * w + 1).min(m);
    let typical: Vec<f64> = (0..m)
        .map(|j| {
            let start = j.saturating_sub(w).min(m - width);
            let others: Vec<f64> = (start..start + width)
                .filter(|&k| k != j)
                .map(|k| rates[k])
                .collect();
            if others.is_empty() {
                rates[j]
            } else {
                median(&others)
            }
        })
        .collect();
    let jumps: Vec<f64> = (0..m).map(|j| differences[j] - typical[j] * gaps[j]).collect();
    let sigma = noise_sigma(&jumps).max(spread_floor(values, config.relative_floor));
    let limit = config.threshold * sigma;

    let mut accepted: Vec<LevelShift> = Vec::new();
    for index in w..=(n - w) {
        let j = index - 1;
        let jump = jumps[j];
        if jump.abs() <= limit || !stands_out(&rates, &gaps, j, jump, limit) {
            continue;
        }
        let before = median(&values[index - w..index]);
        let after = median(&values[index..index + w]);
        let elapsed = median(&steps[index..index + w]) - median(&steps[index - w..index]);
        let shift = after - before - typical[j] * elapsed;

        let persists = shift.signum() == jump.signum()
            && shift.abs() >= 0.5 * jump.abs()
            && shift.abs() > limit;
        if persists {
            accepted.push(LevelShift { index, jump, shift });
        }
    }

    // Keep the strongest shift among those closer than the window.
    accepted.sort_by(|a, b| b.jump.abs().total_cmp(&a.jump.abs()).then(a.index.cmp(&b.index)));
    let mut kept: Vec<LevelShift> = Vec::new();
    for candidate in accepted {
        if kept.iter().all(|k| k.index.abs_diff(candidate.index) >= w) {
            kept.push(candidate);
        }
    }
    kept.sort_by_key(|s| s.index);
    kept
}

/// Whether difference `j` departs from the mean rate of its two neighbours
/// in the direction of `jump`, by more than `limit` and by more than the
/// rates next to those vary.
fn stands_out(rates: &[f64], gaps: &[f64], j: usize, jump: f64, limit: f64) -> bool {
    let m = rates.len();
    let adjacent: Vec<f64> = [j.checked_sub(1), Some(j + 1)]
        .into_iter()
        .flatten()
        .filter(|&k| k < m)
        .map(|k| rates[k])
        .collect();
    if adjacent.is_empty() {
        return true;
    }
    let baseline = adjacent.iter().sum::<f64>() / adjacent.len() as f64;
    let excess = (rates[j] - baseline) * gaps[j];

    let outer = [j.checked_sub(2), Some(j + 1)]
        .into_iter()
        .flatten()
        .filter(|&k| k + 1 < m)
        .map(|k| (rates[k + 1] - rates[k]).abs() * gaps[j])
        .fold(0.0_f64, f64::max);

    excess.signum() == jump.signum() && excess.abs() > limit && excess.abs() > outer
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn shifts_in(values: &[f64]) -> Vec<LevelShift> {
        let steps: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        detect_level_shifts(&steps, values, &LevelShiftConfig::default())
    }

    #[test]
    fn detects_single_step_on_flat_series() {
        let values: Vec<f64> = (0..30).map(|i| if i < 12 { 10.0 } else { 15.0 }).collect();
        let shifts = shifts_in(&values);
        assert_eq!(shifts.len(), 1);
        assert_eq!(shifts[0].index, 12);
        assert_relative_eq!(shifts[0].shift, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn detects_step_on_trend_with_noise() {
        let values: Vec<f64> = (0..60)
            .map(|i| {
                let t = i as f64;
                let level = if i >= 35 { -20.0 } else { 0.0 };
                50.0 + 0.5 * t + level + 0.4 * (t * 1.9).sin()
            })
            .collect();
        let shifts = shifts_in(&values);
        assert_eq!(shifts.len(), 1);
        assert_eq!(shifts[0].index, 35);
        assert!(shifts[0].shift < -15.0);
    }

    #[test]
    fn ignores_spikes_and_smooth_trends() {
        let mut values: Vec<f64> = (0..30).map(|i| 1.0 + 0.2 * i as f64).collect();
        let clean = shifts_in(&values);
        assert!(clean.is_empty());

        values[14] += 30.0;
        let spiked = shifts_in(&values);
        assert!(spiked.is_empty());
    }

    #[test]
    fn shifts_near_the_edges_cannot_be_confirmed() {
        let values: Vec<f64> = (0..20).map(|i| if i < 2 { 0.0 } else { 10.0 }).collect();
        assert!(shifts_in(&values).is_empty());
        assert!(shifts_in(&values[..6]).is_empty());
    }

    #[test]
    fn nearby_shifts_keep_the_strongest() {
        let values: Vec<f64> = (0..40)
            .map(|i| match i {
                0..=14 => 0.0,
                15..=16 => 4.0,
                _ => 20.0,
            })
            .collect();
        let shifts = shifts_in(&values);
        assert_eq!(shifts.len(), 1);
        assert_eq!(shifts[0].index, 17);
    }

    #[test]
    fn smooth_curves_have_no_steps() {
        let curves: [(&str, fn(f64) -> f64); 5] = [
            ("exponential", |x| 2.0 * (0.1 * x).exp()),
            ("square", |x| x * x),
            ("logistic", |x| 1.0 + 10.0 / (1.0 + (-0.5 * (x - 20.0)).exp())),
            ("steep logistic", |x| 1.0 + 10.0 / (1.0 + (-2.0 * (x - 20.0)).exp())),
            ("bump", |x| 10.0 * (-((x - 20.0) / 4.0).powi(2)).exp()),
        ];
        for (name, f) in curves {
            let values: Vec<f64> = (0..40).map(|i| f(i as f64)).collect();
            assert!(shifts_in(&values).is_empty(), "{name}");
        }
    }

    #[test]
    fn gaps_are_measured_in_time() {
        let steps: Vec<f64> = (0..10).chain(16..30).map(f64::from).collect();
        let line: Vec<f64> = steps.iter().map(|t| 2.0 * t).collect();
        let config = LevelShiftConfig::default();
        assert!(detect_level_shifts(&steps, &line, &config).is_empty());

        let stepped: Vec<f64> = steps
            .iter()
            .map(|t| 2.0 * t + if *t >= 16.0 { 10.0 } else { 0.0 })
            .collect();
        let shifts = detect_level_shifts(&steps, &stepped, &config);
        assert_eq!(shifts.len(), 1);
        assert_eq!(shifts[0].index, 10);
        assert_relative_eq!(shifts[0].shift, 10.0, epsilon = 1e-9);
    }
}
