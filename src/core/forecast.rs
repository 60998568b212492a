//! Output table rows and quality flags.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Prediction interval at one confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionInterval {
    /// Confidence level in (0, 1), e.g. 0.9.
    pub level: f64,
    pub lower: f64,
    pub upper: f64,
}

impl PredictionInterval {
    /// Whether the interval brackets `value`.
    pub fn brackets(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// One row of the forecast output table.
///
/// Actual rows carry the observed value; model rows carry the model value and,
/// when available, prediction intervals. A row never carries an empty or
/// fabricated interval: when intervals cannot be computed the list is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRow {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub value: f64,
    pub is_actual: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub intervals: Vec<PredictionInterval>,
}

impl ForecastRow {
    pub fn actual(timestamp: DateTime<Utc>, model: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            model: model.into(),
            value,
            is_actual: true,
            intervals: Vec::new(),
        }
    }

    pub fn predicted(timestamp: DateTime<Utc>, model: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            model: model.into(),
            value,
            is_actual: false,
            intervals: Vec::new(),
        }
    }

    pub fn with_intervals(mut self, intervals: Vec<PredictionInterval>) -> Self {
        self.intervals = intervals;
        self
    }

    /// Interval at `level`, if one was computed.
    pub fn interval(&self, level: f64) -> Option<&PredictionInterval> {
        self.intervals
            .iter()
            .find(|pi| (pi.level - level).abs() < 1e-12)
    }
}

/// Non-fatal conditions recorded while producing a forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityFlag {
    /// The optimizer stopped before meeting its tolerances.
    FitDidNotConverge { model: String },
    /// The series was too short for robust cleaning; it passed through unchanged.
    InsufficientDataForCleaning { needed: usize, got: usize },
    /// Too few residuals to estimate prediction intervals; bounds were omitted.
    IntervalUnavailable { model: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rows_look_up_intervals_by_level() {
        let t = Utc.with_ymd_and_hms(2018, 1, 6, 0, 0, 0).unwrap();
        let row = ForecastRow::predicted(t, "linear", 5.0).with_intervals(vec![
            PredictionInterval {
                level: 0.6,
                lower: 4.5,
                upper: 5.5,
            },
            PredictionInterval {
                level: 0.9,
                lower: 4.0,
                upper: 6.0,
            },
        ]);

        assert!(!row.is_actual);
        assert_eq!(row.interval(0.9).map(|pi| pi.lower), Some(4.0));
        assert!(row.interval(0.5).is_none());
        assert!(row.intervals.iter().all(|pi| pi.brackets(row.value)));

        let actual = ForecastRow::actual(t, "actuals", 3.0);
        assert!(actual.is_actual);
        assert!(actual.intervals.is_empty());
    }

    #[test]
    fn quality_flags_serialize_with_kind_tag() {
        let flag = QualityFlag::IntervalUnavailable {
            model: "linear".to_string(),
        };
        let json = serde_json::to_string(&flag).unwrap();
        assert_eq!(json, r#"{"kind":"interval_unavailable","model":"linear"}"#);
    }
}
