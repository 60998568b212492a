//! Series cleaning: outlier replacement and level-shift handling.

use crate::core::{QualityFlag, TimeSeries};
use crate::detection::{
    detect_level_shifts, detect_outliers, LevelShift, LevelShiftConfig, OutlierConfig,
};
use crate::preprocess::record::{AnomalyKind, AnomalyRecord, CleanedSeries, StepChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Detection passes before cleaning gives up on reaching a fixed point.
const MAX_CLEANING_ROUNDS: usize = 16;

/// What to do with a detected level shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepHandling {
    /// Leave the data alone and offer step terms to model selection.
    #[default]
    Model,
    /// Shift the history before each step onto the latest level.
    Adjust,
}

/// Configuration for [`SeriesPreprocessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Fewer observed points than this skip cleaning entirely.
    pub min_points: usize,
    pub detect_outliers: bool,
    /// Neighbourhood size of the local trend line used for outlier detection.
    pub outlier_window: usize,
    /// Outlier threshold in robust standard deviations.
    pub outlier_threshold: f64,
    pub detect_steps: bool,
    /// Confirmation window on each side of a level shift.
    pub step_window: usize,
    /// Level-shift threshold in robust standard deviations.
    pub step_threshold: f64,
    pub step_handling: StepHandling,
    /// Spread floor relative to the series scale.
    pub spread_floor: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_points: 7,
            detect_outliers: true,
            outlier_window: 7,
            outlier_threshold: 3.5,
            detect_steps: true,
            step_window: 5,
            step_threshold: 4.0,
            step_handling: StepHandling::Model,
            spread_floor: 1e-6,
        }
    }
}

impl PreprocessConfig {
    /// Configuration that never alters the series.
    pub fn disabled() -> Self {
        Self {
            detect_outliers: false,
            detect_steps: false,
            ..Default::default()
        }
    }

    pub fn with_outlier_threshold(mut self, threshold: f64) -> Self {
        self.outlier_threshold = threshold;
        self
    }

    pub fn with_step_handling(mut self, handling: StepHandling) -> Self {
        self.step_handling = handling;
        self
    }

    pub fn with_detect_steps(mut self, detect: bool) -> Self {
        self.detect_steps = detect;
        self
    }

    pub fn with_detect_outliers(mut self, detect: bool) -> Self {
        self.detect_outliers = detect;
        self
    }

    fn outlier_config(&self) -> OutlierConfig {
        OutlierConfig {
            window: self.outlier_window,
            threshold: self.outlier_threshold,
            relative_floor: self.spread_floor,
        }
    }

    fn level_shift_config(&self) -> LevelShiftConfig {
        LevelShiftConfig {
            window: self.step_window,
            threshold: self.step_threshold,
            relative_floor: self.spread_floor,
        }
    }
}

/// Detects and neutralises outliers and level shifts.
///
/// # Example
///
/// ```
/// use anofox_anticipate::core::TimeSeries;
/// use anofox_anticipate::preprocess::SeriesPreprocessor;
/// use chrono::{Duration, TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
/// let timestamps = (0..20).map(|i| start + Duration::days(i)).collect();
/// let mut values: Vec<f64> = (0..20).map(|i| i as f64).collect();
/// values[10] = 500.0;
/// let series = TimeSeries::new(timestamps, values).unwrap();
///
/// let cleaned = SeriesPreprocessor::default().clean(&series);
/// assert_eq!(cleaned.anomalies.len(), 1);
/// assert!((cleaned.series.values()[10] - 10.0).abs() < 1e-9);
/// assert_eq!(series.values()[10], 500.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SeriesPreprocessor {
    config: PreprocessConfig,
}

impl SeriesPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Clean `series`. Never fails; short series pass through with a flag.
    pub fn clean(&self, series: &TimeSeries) -> CleanedSeries {
        let observed = series.observed_indices();
        if observed.len() < self.config.min_points {
            debug!(
                observed = observed.len(),
                needed = self.config.min_points,
                "series too short to clean"
            );
            return CleanedSeries {
                series: series.clone(),
                anomalies: Vec::new(),
                steps: Vec::new(),
                flags: vec![QualityFlag::InsufficientDataForCleaning {
                    needed: self.config.min_points,
                    got: observed.len(),
                }],
            };
        }

        let timestamps = series.timestamps();
        let axis = observed_steps(series, &observed);
        let input: Vec<f64> = observed.iter().map(|&i| series.values()[i]).collect();
        let mut current = input.clone();
        let mut replaced = vec![false; observed.len()];
        let mut adjustments = Vec::new();

        // Repeat detection until a pass finds nothing.
        let adjust = self.config.detect_steps && self.config.step_handling == StepHandling::Adjust;
        let mut settled = false;
        for round in 0..MAX_CLEANING_ROUNDS {
            let mut changed = false;
            if self.config.detect_outliers {
                let result = detect_outliers(&axis, &current, &self.config.outlier_config());
                for &p in &result.outlier_indices {
                    if let Some(r) = result.replacement(p) {
                        current[p] = r;
                        replaced[p] = true;
                        changed = true;
                    }
                }
            }
            if adjust {
                let shifts = detect_level_shifts(&axis, &current, &self.config.level_shift_config());
                if !shifts.is_empty() {
                    adjustments.extend(level_history(timestamps, &observed, &shifts, &mut current));
                    changed = true;
                }
            }
            if !changed {
                debug!(rounds = round, "cleaning settled");
                settled = true;
                break;
            }
        }
        if !settled {
            warn!(
                rounds = MAX_CLEANING_ROUNDS,
                "cleaning did not settle; a second pass may still change the series"
            );
        }

        let flagged: Vec<usize> = (0..observed.len()).filter(|&p| replaced[p]).collect();
        let mut anomalies: Vec<AnomalyRecord> = consecutive_runs(&flagged)
            .into_iter()
            .map(|run| AnomalyRecord {
                kind: AnomalyKind::Outlier,
                start: timestamps[observed[run[0]]],
                end: timestamps[observed[run[run.len() - 1]]],
                original: run.iter().map(|&p| input[p]).collect(),
                replacement: run.iter().map(|&p| current[p]).collect(),
            })
            .collect();
        anomalies.extend(adjustments);

        let steps: Vec<StepChange> = if self.config.detect_steps && !adjust {
            detect_level_shifts(&axis, &current, &self.config.level_shift_config())
                .iter()
                .map(|s| StepChange {
                    index: observed[s.index],
                    timestamp: timestamps[observed[s.index]],
                    jump: s.jump,
                    shift: s.shift,
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut values = series.values().to_vec();
        for (&i, &v) in observed.iter().zip(&current) {
            values[i] = v;
        }

        let cleaned = match series.with_values(values) {
            Ok(cleaned) => cleaned,
            Err(err) => {
                warn!(error = %err, "cleaned values rejected; keeping the input series");
                return CleanedSeries {
                    series: series.clone(),
                    anomalies: Vec::new(),
                    steps,
                    flags: Vec::new(),
                };
            }
        };

        debug!(
            outliers = anomalies
                .iter()
                .filter(|a| a.kind == AnomalyKind::Outlier)
                .count(),
            steps = steps.len(),
            "series cleaned"
        );

        CleanedSeries {
            series: cleaned,
            anomalies,
            steps,
            flags: Vec::new(),
        }
    }
}

/// Time offsets of the observed points, in cadence steps when a cadence can
/// be inferred and in positions otherwise.
fn observed_steps(series: &TimeSeries, observed: &[usize]) -> Vec<f64> {
    match series.infer_cadence() {
        Ok(cadence) => {
            let grid = series.time_grid(&cadence);
            observed.iter().map(|&i| grid.steps()[i]).collect()
        }
        Err(_) => observed.iter().map(|&i| i as f64).collect(),
    }
}

/// Split ascending positions into runs of consecutive positions.
fn consecutive_runs(positions: &[usize]) -> Vec<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    for &p in positions {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|&last| last + 1 == p) => run.push(p),
            _ => runs.push(vec![p]),
        }
    }
    runs
}

/// Shift everything before each level shift by that shift, latest level kept.
///
/// `values` holds the observed points only; `observed` maps them back to
/// series positions for the record timestamps.
fn level_history(
    timestamps: &[DateTime<Utc>],
    observed: &[usize],
    shifts: &[LevelShift],
    values: &mut [f64],
) -> Vec<AnomalyRecord> {
    let mut records = Vec::new();
    for shift in shifts {
        let before = 0..shift.index;
        if before.is_empty() {
            continue;
        }
        let original = values[before.clone()].to_vec();
        for v in &mut values[before.clone()] {
            *v += shift.shift;
        }
        records.push(AnomalyRecord {
            kind: AnomalyKind::StepChange,
            start: timestamps[observed[0]],
            end: timestamps[observed[shift.index - 1]],
            original,
            replacement: values[before].to_vec(),
        });
    }
    records
}
