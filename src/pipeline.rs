//! End-to-end forecasting: clean, select, assemble.
//!
//! [`run_forecast`] takes one series through the whole pipeline and returns
//! the output table together with everything that was learned on the way:
//! the anomalies replaced by the preprocessor, the level shifts offered to
//! the models, a summary of every candidate fit and the non-fatal quality
//! flags. [`run_batch`] does the same for many named series and never lets
//! one bad series stop the others.
//!
//! ```
//! use anofox_anticipate::core::{Horizon, TimeSeries};
//! use anofox_anticipate::pipeline::{run_forecast, ForecastConfig};
//! use chrono::{Duration, TimeZone, Utc};
//!
//! let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
//! let timestamps = (0..5).map(|i| start + Duration::days(i)).collect();
//! let series = TimeSeries::new(timestamps, vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
//!
//! let config = ForecastConfig::default()
//!     .with_catalog(["y", "linear"])
//!     .with_horizon(Horizon::Days(7.0));
//! let run = run_forecast(&series, None, &config).unwrap();
//!
//! assert_eq!(run.best_model, "linear");
//! assert_eq!(run.rows.iter().filter(|r| r.is_actual).count(), 5);
//! ```

use crate::assembly::{AssemblerConfig, ForecastAssembler};
use crate::core::{EventCalendar, ForecastRow, Horizon, QualityFlag, TimeSeries};
use crate::error::{ForecastError, Result};
use crate::fitting::FitResult;
use crate::models::ModelCatalog;
use crate::preprocess::{AnomalyRecord, PreprocessConfig, SeriesPreprocessor, StepChange};
use crate::selection::{ModelSelector, SelectorConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration for a forecast run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Catalog entries in preference order. Empty selects the default
    /// catalog for the inferred cadence.
    pub catalog: Vec<String>,
    pub horizon: Horizon,
    pub preprocess: PreprocessConfig,
    pub selector: SelectorConfig,
    pub assembler: AssemblerConfig,
    /// Emit forecast rows for every ranked fit, not only the best.
    pub include_all_fits: bool,
    /// Add Akaike-weighted ensemble rows over this many top fits.
    pub ensemble_top: Option<usize>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            catalog: Vec::new(),
            horizon: Horizon::default(),
            preprocess: PreprocessConfig::default(),
            selector: SelectorConfig::default(),
            assembler: AssemblerConfig::default(),
            include_all_fits: false,
            ensemble_top: None,
        }
    }
}

impl ForecastConfig {
    pub fn with_catalog<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog = entries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_horizon(mut self, horizon: Horizon) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_preprocess(mut self, preprocess: PreprocessConfig) -> Self {
        self.preprocess = preprocess;
        self
    }

    pub fn with_selector(mut self, selector: SelectorConfig) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_assembler(mut self, assembler: AssemblerConfig) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_include_all_fits(mut self, include: bool) -> Self {
        self.include_all_fits = include;
        self
    }

    pub fn with_ensemble_top(mut self, top: usize) -> Self {
        self.ensemble_top = Some(top);
        self
    }
}

/// One line of the fit metadata table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitSummary {
    pub model: String,
    /// Position in the ranking, starting at 0 for the preferred fit.
    pub rank: usize,
    pub params: Vec<f64>,
    pub sse: f64,
    pub score: f64,
    pub converged: bool,
    pub iterations: usize,
    pub is_best: bool,
}

impl FitSummary {
    fn from_fit(rank: usize, fit: &FitResult<'_>) -> Self {
        Self {
            model: fit.model_name().to_string(),
            rank,
            params: fit.params().to_vec(),
            sse: fit.sse(),
            score: fit.score(),
            converged: fit.converged(),
            iterations: fit.iterations(),
            is_best: rank == 0,
        }
    }
}

/// Result of forecasting one series.
#[derive(Debug, Clone)]
pub struct ForecastRun {
    /// Actual rows first, then model rows.
    pub rows: Vec<ForecastRow>,
    /// One summary per ranked fit, in ranking order.
    pub metadata: Vec<FitSummary>,
    pub anomalies: Vec<AnomalyRecord>,
    pub steps: Vec<StepChange>,
    pub flags: Vec<QualityFlag>,
    pub best_model: String,
}

impl ForecastRun {
    /// Rows belonging to one model.
    pub fn rows_for<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a ForecastRow> + 'a {
        self.rows.iter().filter(move |r| !r.is_actual && r.model == model)
    }

    pub fn actuals(&self) -> impl Iterator<Item = &ForecastRow> {
        self.rows.iter().filter(|r| r.is_actual)
    }
}

/// Forecast one series.
///
/// Malformed configuration or an unusable series fails before any fitting
/// starts. Convergence problems, skipped cleaning and missing intervals are
/// reported through [`ForecastRun::flags`].
pub fn run_forecast(
    series: &TimeSeries,
    calendar: Option<Arc<EventCalendar>>,
    config: &ForecastConfig,
) -> Result<ForecastRun> {
    let cadence = series.infer_cadence()?;
    config.assembler.intervals.validate()?;
    config.horizon.periods(&cadence)?;
    if config.ensemble_top.is_some_and(|k| k < 2) {
        return Err(ForecastError::InvalidParameter(
            "an ensemble needs at least 2 members".to_string(),
        ));
    }
    let catalog = if config.catalog.is_empty() {
        ModelCatalog::default_for(&cadence)
    } else {
        ModelCatalog::new(config.catalog.iter().cloned())?
    };

    let cleaned = SeriesPreprocessor::new(config.preprocess.clone()).clean(series);
    let mut flags = cleaned.flags.clone();

    let selector = ModelSelector::new(config.selector.clone());
    let candidates = selector.candidates(
        &catalog,
        &cleaned.series,
        calendar.as_ref(),
        &cleaned.step_times(),
    )?;
    let ranked = selector.select(&cleaned.series, &candidates)?;

    flags.extend(
        ranked
            .iter()
            .filter(|f| !f.converged())
            .map(|f| QualityFlag::FitDidNotConverge {
                model: f.model_name().to_string(),
            }),
    );

    let assembly = ForecastAssembler::new(config.assembler.clone()).assemble_ranked(
        series,
        &ranked,
        config.horizon,
        config.include_all_fits,
        config.ensemble_top,
    )?;
    flags.extend(assembly.flags);

    let metadata: Vec<FitSummary> = ranked
        .iter()
        .enumerate()
        .map(|(rank, fit)| FitSummary::from_fit(rank, fit))
        .collect();
    let best_model = metadata
        .first()
        .map(|s| s.model.clone())
        .unwrap_or_default();

    debug!(
        best = best_model.as_str(),
        candidates = candidates.len(),
        anomalies = cleaned.anomalies.len(),
        flags = flags.len(),
        "forecast finished"
    );

    Ok(ForecastRun {
        rows: assembly.rows,
        metadata,
        anomalies: cleaned.anomalies,
        steps: cleaned.steps,
        flags,
        best_model,
    })
}

/// Forecast many named series with one configuration.
///
/// Results keep the input order. A failing series yields an `Err` entry and
/// the rest of the batch carries on.
pub fn run_batch<I, S>(
    series: I,
    calendar: Option<Arc<EventCalendar>>,
    config: &ForecastConfig,
) -> Vec<(String, Result<ForecastRun>)>
where
    I: IntoIterator<Item = (S, TimeSeries)>,
    S: Into<String>,
{
    series
        .into_iter()
        .map(|(name, s)| {
            let name = name.into();
            let result = run_forecast(&s, calendar.clone(), config);
            if let Err(e) = &result {
                warn!(source = name.as_str(), error = %e, "forecast failed");
            }
            (name, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CalendarEvent;
    use crate::preprocess::StepHandling;
    use approx::assert_relative_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()
    }

    fn daily(values: Vec<f64>) -> TimeSeries {
        let ts = (0..values.len())
            .map(|i| start() + Duration::days(i as i64))
            .collect();
        TimeSeries::new(ts, values).unwrap()
    }

    #[test]
    fn metadata_follows_ranking() {
        let series = daily((0..20).map(|i| 2.0 * i as f64 + 1.0).collect());
        let config = ForecastConfig::default().with_catalog(["y", "linear", "exp"]);
        let run = run_forecast(&series, None, &config).unwrap();

        assert_eq!(run.metadata.len(), 3);
        assert_eq!(run.metadata[0].model, "linear");
        assert!(run.metadata[0].is_best);
        assert!(run.metadata[1..].iter().all(|s| !s.is_best));
        assert!(run.metadata.iter().enumerate().all(|(i, s)| s.rank == i));
        assert_relative_eq!(run.metadata[0].params[1], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn clean_exponential_growth_keeps_its_shape() {
        let series = daily((0..40).map(|i| 2.0 * (0.1 * i as f64).exp()).collect());
        let config = ForecastConfig::default()
            .with_catalog(["linear", "exponential", "logistic"])
            .with_horizon(Horizon::Periods(5));
        let run = run_forecast(&series, None, &config).unwrap();

        assert!(run.anomalies.is_empty());
        assert!(run.steps.is_empty());
        assert_eq!(run.best_model, "exponential");
        assert_relative_eq!(run.metadata[0].params[1], 0.1, epsilon = 1e-6);
    }

    #[test]
    fn unknown_catalog_entry_fails_before_fitting() {
        let series = daily(vec![1.0, 2.0, 3.0]);
        let config = ForecastConfig::default().with_catalog(["linear", "quadratic"]);
        let err = run_forecast(&series, None, &config).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidModelSpec(msg) if msg.contains("quadratic")));
    }

    #[test]
    fn empty_catalog_uses_the_cadence_default() {
        let series = daily((0..30).map(|i| i as f64).collect());
        let config = ForecastConfig::default().with_horizon(Horizon::Periods(3));
        let run = run_forecast(&series, None, &config).unwrap();

        let expected = ModelCatalog::default_for(&series.infer_cadence().unwrap()).len();
        assert_eq!(run.metadata.len(), expected);
    }

    #[test]
    fn include_all_fits_and_ensemble_rows() {
        let series = daily((0..20).map(|i| i as f64 + (i as f64).sin()).collect());
        let config = ForecastConfig::default()
            .with_catalog(["y", "linear"])
            .with_horizon(Horizon::Periods(4))
            .with_include_all_fits(true)
            .with_ensemble_top(2);
        let run = run_forecast(&series, None, &config).unwrap();

        assert_eq!(run.rows_for("linear").count(), 4);
        assert_eq!(run.rows_for("y").count(), 4);
        assert_eq!(run.rows_for("ensemble").count(), 4);
    }

    #[test]
    fn ensemble_of_one_is_rejected() {
        let series = daily(vec![1.0, 2.0, 3.0]);
        let config = ForecastConfig::default().with_ensemble_top(1);
        assert!(matches!(
            run_forecast(&series, None, &config),
            Err(ForecastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn level_shift_is_offered_as_a_step_model() {
        let values: Vec<f64> = (0..40)
            .map(|i| if i < 20 { 10.0 } else { 30.0 } + 0.3 * (i as f64 * 1.9).sin())
            .collect();
        let series = daily(values);
        let config = ForecastConfig::default()
            .with_catalog(["constant", "linear"])
            .with_horizon(Horizon::Periods(5));
        let run = run_forecast(&series, None, &config).unwrap();

        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].index, 20);
        assert!(run.best_model.ends_with("+steps"));
        for row in run.rows_for(&run.best_model) {
            assert_relative_eq!(row.value, 30.0, epsilon = 1.0);
        }
    }

    #[test]
    fn adjusted_steps_leave_no_step_models() {
        let values: Vec<f64> = (0..40)
            .map(|i| if i < 20 { 10.0 } else { 30.0 } + 0.3 * (i as f64 * 1.9).sin())
            .collect();
        let series = daily(values);
        let config = ForecastConfig::default()
            .with_catalog(["constant"])
            .with_preprocess(PreprocessConfig::default().with_step_handling(StepHandling::Adjust));
        let run = run_forecast(&series, None, &config).unwrap();

        assert!(run.steps.is_empty());
        assert_eq!(run.metadata.len(), 1);
        assert!(!run.anomalies.is_empty());
    }

    #[test]
    fn calendar_events_join_every_candidate() {
        let values: Vec<f64> = (0..60)
            .map(|i| if (20..23).contains(&i) || (50..53).contains(&i) { 15.0 } else { 5.0 })
            .collect();
        let series = daily(values);
        let promo = |from: i64| {
            CalendarEvent::new(
                "promo",
                start() + Duration::days(from),
                start() + Duration::days(from + 2),
            )
            .unwrap()
        };
        let calendar = Arc::new(EventCalendar::new(vec![promo(20), promo(50)]).unwrap());
        let config = ForecastConfig::default()
            .with_catalog(["constant"])
            .with_preprocess(PreprocessConfig::disabled())
            .with_horizon(Horizon::Periods(2));
        let run = run_forecast(&series, Some(calendar), &config).unwrap();

        assert_eq!(run.metadata.len(), 1);
        assert!(run.metadata[0].sse < 1e-8);
    }

    #[test]
    fn batch_keeps_going_after_a_failure() {
        let good = daily(vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let single = daily(vec![1.0]);
        let config = ForecastConfig::default().with_catalog(["linear"]);
        let results = run_batch(
            vec![("a", good.clone()), ("b", single), ("c", good)],
            None,
            &config,
        );

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "a");
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ForecastConfig::default()
            .with_catalog(["linear*weekday"])
            .with_horizon(Horizon::Periods(14))
            .with_ensemble_top(3);
        let json = serde_json::to_string(&config).unwrap();
        let back: ForecastConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let partial: ForecastConfig = serde_json::from_str(r#"{"include_all_fits": true}"#).unwrap();
        assert!(partial.include_all_fits);
        assert_eq!(partial.horizon, Horizon::default());
    }
}
