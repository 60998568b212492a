//! Univariate time series, cadence inference and the time grid models are evaluated on.

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Datelike, Duration, Months, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean length of a Gregorian month in days.
const DAYS_PER_MONTH: f64 = 30.436875;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Longest forecast horizon, in cadence steps.
pub const MAX_HORIZON_PERIODS: usize = 1_000_000;

/// A validated univariate time series.
///
/// Timestamps are strictly increasing. Values are finite or NaN, where NaN
/// marks an explicitly missing observation. Gaps in the timestamps are kept
/// as they are; nothing is reindexed.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    timestamps: Vec<DateTime<Utc>>,
    values: Vec<f64>,
    weights: Option<Vec<f64>>,
}

impl TimeSeries {
    /// Create a series, rejecting malformed input.
    pub fn new(timestamps: Vec<DateTime<Utc>>, values: Vec<f64>) -> Result<Self> {
        if timestamps.is_empty() {
            return Err(ForecastError::InvalidSeries("empty series".to_string()));
        }
        if values.len() != timestamps.len() {
            return Err(ForecastError::InvalidSeries(format!(
                "{} timestamps but {} values",
                timestamps.len(),
                values.len()
            )));
        }

        for i in 1..timestamps.len() {
            if timestamps[i] <= timestamps[i - 1] {
                return Err(ForecastError::InvalidSeries(format!(
                    "timestamp {} at row {} is not after {}",
                    timestamps[i],
                    i,
                    timestamps[i - 1]
                )));
            }
        }

        if let Some(i) = values.iter().position(|v| v.is_infinite()) {
            return Err(ForecastError::InvalidSeries(format!(
                "value at {} is not finite",
                timestamps[i]
            )));
        }

        if values.iter().all(|v| v.is_nan()) {
            return Err(ForecastError::InvalidSeries(
                "all values are missing".to_string(),
            ));
        }

        Ok(Self {
            timestamps,
            values,
            weights: None,
        })
    }

    /// Create a series from `(timestamp, value)` pairs where `None` marks a missing value.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (DateTime<Utc>, Option<f64>)>,
    {
        let (timestamps, values): (Vec<_>, Vec<_>) = pairs
            .into_iter()
            .map(|(t, v)| (t, v.unwrap_or(f64::NAN)))
            .unzip();
        Self::new(timestamps, values)
    }

    /// Attach per-point weights. A zero weight excludes the point from fitting.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.values.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: self.values.len(),
                got: weights.len(),
            });
        }
        if let Some(i) = weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
            return Err(ForecastError::InvalidSeries(format!(
                "weight at {} must be finite and non-negative",
                self.timestamps[i]
            )));
        }
        let usable = self
            .values
            .iter()
            .zip(weights.iter())
            .any(|(v, w)| v.is_finite() && *w > 0.0);
        if !usable {
            return Err(ForecastError::InvalidSeries(
                "no observed value carries a positive weight".to_string(),
            ));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    /// Return a new series on the same timestamps with different values.
    ///
    /// Weights are carried over.
    pub fn with_values(&self, values: Vec<f64>) -> Result<Self> {
        let mut series = Self::new(self.timestamps.clone(), values)?;
        series.weights = self.weights.clone();
        Ok(series)
    }

    /// Number of timestamps (observed or missing).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// A validated series is never empty; provided for API completeness.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn first_timestamp(&self) -> DateTime<Utc> {
        self.timestamps[0]
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.timestamps[self.timestamps.len() - 1]
    }

    /// Check whether the value at `index` is missing.
    pub fn is_missing(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(|v| v.is_nan())
    }

    /// Number of non-missing values.
    pub fn observed_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }

    /// Indices of non-missing values.
    pub fn observed_indices(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, _)| i)
            .collect()
    }

    /// Infer the sampling cadence from timestamp spacing.
    pub fn infer_cadence(&self) -> Result<Cadence> {
        Cadence::infer(&self.timestamps)
    }

    /// Time grid over the observed timestamps, with step 0 at the first timestamp.
    pub fn time_grid(&self, cadence: &Cadence) -> TimeGrid {
        TimeGrid::new(self.first_timestamp(), cadence, self.timestamps.clone())
    }
}

/// Sampling cadence of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fixed spacing (hourly, daily, weekly, ...).
    Fixed(Duration),
    /// A whole number of calendar months (monthly, quarterly, yearly).
    Months(u32),
}

impl Cadence {
    /// Infer the cadence from strictly increasing timestamps.
    ///
    /// Timestamps sharing the same day of month and time of day whose month
    /// distances are all multiples of the smallest distance are read as a
    /// calendar-month cadence. Otherwise the modal spacing is used, ties going
    /// to the shorter spacing; gaps that are not the modal spacing are allowed.
    pub fn infer(timestamps: &[DateTime<Utc>]) -> Result<Self> {
        if timestamps.len() < 2 {
            return Err(ForecastError::InsufficientData {
                needed: 2,
                got: timestamps.len(),
            });
        }

        if let Some(months) = calendar_month_spacing(timestamps) {
            return Ok(Cadence::Months(months));
        }

        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for w in timestamps.windows(2) {
            *counts.entry((w[1] - w[0]).num_milliseconds()).or_insert(0) += 1;
        }

        let mut modal: Option<(i64, usize)> = None;
        for (&diff, &count) in &counts {
            if modal.is_none_or(|(_, best)| count > best) {
                modal = Some((diff, count));
            }
        }

        match modal {
            Some((diff, _)) if diff > 0 => Ok(Cadence::Fixed(Duration::milliseconds(diff))),
            _ => Err(ForecastError::FrequencyInference(
                "timestamps are not strictly increasing".to_string(),
            )),
        }
    }

    /// Timestamp `periods` cadence steps after `from`.
    pub fn advance(&self, from: DateTime<Utc>, periods: u32) -> Result<DateTime<Utc>> {
        let next = match self {
            Cadence::Fixed(step) => i32::try_from(periods)
                .ok()
                .and_then(|p| step.checked_mul(p))
                .and_then(|d| from.checked_add_signed(d)),
            Cadence::Months(m) => m
                .checked_mul(periods)
                .and_then(|total| from.checked_add_months(Months::new(total))),
        };
        next.ok_or_else(|| {
            ForecastError::ComputationError(format!(
                "advancing {} by {} periods overflows",
                from, periods
            ))
        })
    }

    /// Distance from `origin` to `timestamp` measured in cadence steps.
    pub fn offset(&self, origin: DateTime<Utc>, timestamp: DateTime<Utc>) -> f64 {
        match self {
            Cadence::Fixed(step) => {
                (timestamp - origin).num_milliseconds() as f64 / step.num_milliseconds() as f64
            }
            Cadence::Months(m) => {
                let whole = (timestamp.year() - origin.year()) * 12 + timestamp.month() as i32
                    - origin.month() as i32;
                let fraction = shift_months(origin, whole)
                    .map(|anchor| {
                        (timestamp - anchor).num_milliseconds() as f64
                            / (MILLIS_PER_DAY * DAYS_PER_MONTH)
                    })
                    .unwrap_or(0.0);
                (whole as f64 + fraction) / *m as f64
            }
        }
    }

    /// Number of whole cadence steps that fit in `span`.
    pub fn periods_in(&self, span: Duration) -> usize {
        let span_ms = span.num_milliseconds();
        if span_ms <= 0 {
            return 0;
        }
        match self {
            Cadence::Fixed(step) => (span_ms / step.num_milliseconds()) as usize,
            Cadence::Months(m) => {
                let months = span_ms as f64 / (MILLIS_PER_DAY * DAYS_PER_MONTH);
                (months / *m as f64 + 1e-9).floor() as usize
            }
        }
    }

    /// Approximate length of one step.
    pub fn approx_duration(&self) -> Duration {
        match self {
            Cadence::Fixed(step) => *step,
            Cadence::Months(m) => {
                Duration::milliseconds((MILLIS_PER_DAY * DAYS_PER_MONTH * *m as f64) as i64)
            }
        }
    }
}

fn shift_months(dt: DateTime<Utc>, months: i32) -> Option<DateTime<Utc>> {
    if months >= 0 {
        dt.checked_add_months(Months::new(months as u32))
    } else {
        dt.checked_sub_months(Months::new(months.unsigned_abs()))
    }
}

fn calendar_month_spacing(timestamps: &[DateTime<Utc>]) -> Option<u32> {
    let first = timestamps[0];
    let aligned = timestamps.iter().all(|t| {
        t.day() == first.day()
            && t.num_seconds_from_midnight() == first.num_seconds_from_midnight()
            && t.nanosecond() == first.nanosecond()
    });
    if !aligned {
        return None;
    }

    let month_index = |t: &DateTime<Utc>| t.year() as i64 * 12 + t.month0() as i64;
    let diffs: Vec<i64> = timestamps
        .windows(2)
        .map(|w| month_index(&w[1]) - month_index(&w[0]))
        .collect();
    let smallest = *diffs.iter().min()?;
    if smallest <= 0 || diffs.iter().any(|d| d % smallest != 0) {
        return None;
    }
    u32::try_from(smallest).ok()
}

/// How far past the last observation to forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    /// A number of cadence steps.
    Periods(usize),
    /// A span in days.
    Days(f64),
    /// A span in years of 365.25 days.
    Years(f64),
}

impl Default for Horizon {
    fn default() -> Self {
        Horizon::Years(2.0)
    }
}

impl Horizon {
    /// Horizon covering a duration.
    pub fn span(duration: Duration) -> Self {
        Horizon::Days(duration.num_milliseconds() as f64 / MILLIS_PER_DAY)
    }

    /// Resolve the horizon into a number of cadence steps.
    ///
    /// Fails with [`ForecastError::InvalidParameter`] for negative or
    /// non-finite spans and for horizons beyond [`MAX_HORIZON_PERIODS`].
    pub fn periods(&self, cadence: &Cadence) -> Result<usize> {
        let periods = match *self {
            Horizon::Periods(p) => p,
            Horizon::Days(d) => span_periods(d, cadence)?,
            Horizon::Years(y) => span_periods(y * 365.25, cadence)?,
        };
        if periods > MAX_HORIZON_PERIODS {
            return Err(ForecastError::InvalidParameter(format!(
                "horizon of {} periods exceeds the limit of {}",
                periods, MAX_HORIZON_PERIODS
            )));
        }
        Ok(periods)
    }
}

fn span_periods(days: f64, cadence: &Cadence) -> Result<usize> {
    if !days.is_finite() || days < 0.0 {
        return Err(ForecastError::InvalidParameter(format!(
            "horizon must be a finite non-negative span, got {} days",
            days
        )));
    }
    let millis = (days * MILLIS_PER_DAY).round();
    if millis >= i64::MAX as f64 {
        return Err(ForecastError::InvalidParameter(format!(
            "horizon of {} days is too long",
            days
        )));
    }
    Ok(cadence.periods_in(Duration::milliseconds(millis as i64)))
}

/// Points at which a model is evaluated.
///
/// `steps` measures time in cadence steps from the origin and drives trend
/// components; `timestamps` drive calendar-aware components (weekday, month,
/// Fourier, events).
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    origin: DateTime<Utc>,
    steps: Vec<f64>,
    timestamps: Vec<DateTime<Utc>>,
}

impl TimeGrid {
    /// Grid over `timestamps` measured from `origin`.
    pub fn new(origin: DateTime<Utc>, cadence: &Cadence, timestamps: Vec<DateTime<Utc>>) -> Self {
        let steps = timestamps
            .iter()
            .map(|&t| cadence.offset(origin, t))
            .collect();
        Self {
            origin,
            steps,
            timestamps,
        }
    }

    /// Grid over arbitrary step offsets; timestamps are derived from the cadence.
    pub fn from_steps(origin: DateTime<Utc>, cadence: &Cadence, steps: Vec<f64>) -> Result<Self> {
        let step_ms = cadence.approx_duration().num_milliseconds() as f64;
        let timestamps = steps
            .iter()
            .map(|&s| {
                if !s.is_finite() {
                    return None;
                }
                origin.checked_add_signed(Duration::milliseconds((s * step_ms).round() as i64))
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                ForecastError::InvalidParameter("step offsets out of timestamp range".to_string())
            })?;
        Ok(Self {
            origin,
            steps,
            timestamps,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Sub-grid at the given positions.
    pub fn select(&self, indices: &[usize]) -> TimeGrid {
        TimeGrid {
            origin: self.origin,
            steps: indices.iter().map(|&i| self.steps[i]).collect(),
            timestamps: indices.iter().map(|&i| self.timestamps[i]).collect(),
        }
    }
}
