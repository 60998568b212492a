//! What the preprocessor changed or found.

use crate::core::{QualityFlag, TimeSeries};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Outlier,
    StepChange,
}

/// A contiguous run of altered observations.
///
/// `original` and `replacement` list the observed values in the range, in
/// timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub kind: AnomalyKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub original: Vec<f64>,
    pub replacement: Vec<f64>,
}

/// A detected level shift offered to model selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepChange {
    /// Series index of the first observation at the new level.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    /// Jump between consecutive observations, net of the local trend.
    pub jump: f64,
    /// Persistent level change.
    pub shift: f64,
}

/// Output of [`SeriesPreprocessor::clean`](super::SeriesPreprocessor::clean).
///
/// `series` is always a new value; the input series is never modified.
#[derive(Debug, Clone)]
pub struct CleanedSeries {
    pub series: TimeSeries,
    pub anomalies: Vec<AnomalyRecord>,
    /// Level shifts left in the data for the model to represent.
    pub steps: Vec<StepChange>,
    pub flags: Vec<QualityFlag>,
}

impl CleanedSeries {
    /// Whether anything was altered.
    pub fn is_modified(&self) -> bool {
        !self.anomalies.is_empty()
    }

    pub fn outliers(&self) -> impl Iterator<Item = &AnomalyRecord> {
        self.anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::Outlier)
    }

    /// Timestamps at which the model family should allow a level shift.
    pub fn step_times(&self) -> Vec<DateTime<Utc>> {
        self.steps.iter().map(|s| s.timestamp).collect()
    }
}
