//! Merge actuals and model extrapolations into the output table.

use crate::assembly::{IntervalConfig, ResidualSpread};
use crate::core::{ForecastRow, Horizon, QualityFlag, TimeSeries};
use crate::error::{ForecastError, Result};
use crate::fitting::FitResult;
use crate::selection::Ensemble;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Model name of the Akaike-weighted ensemble rows.
pub const ENSEMBLE_NAME: &str = "ensemble";

/// Configuration for [`ForecastAssembler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub intervals: IntervalConfig,
    /// Also emit in-sample model rows for observed timestamps.
    pub include_fitted: bool,
    /// Model name carried by actual rows.
    pub actuals_label: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            intervals: IntervalConfig::default(),
            include_fitted: false,
            actuals_label: "actuals".to_string(),
        }
    }
}

impl AssemblerConfig {
    pub fn with_intervals(mut self, intervals: IntervalConfig) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_include_fitted(mut self, include: bool) -> Self {
        self.include_fitted = include;
        self
    }
}

/// Rows plus the non-fatal conditions met while producing them.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub rows: Vec<ForecastRow>,
    pub flags: Vec<QualityFlag>,
}

/// Builds the forecast table.
#[derive(Debug, Clone, Default)]
pub struct ForecastAssembler {
    config: AssemblerConfig,
}

impl ForecastAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Actual rows followed by the fitted model's rows.
    ///
    /// One actual row per observed timestamp of `series` carries the
    /// original value. Forecast rows follow at the fit's cadence for every
    /// step within `horizon` after the last timestamp.
    pub fn assemble(
        &self,
        series: &TimeSeries,
        fit: &FitResult<'_>,
        horizon: Horizon,
    ) -> Result<Assembly> {
        self.assemble_ranked(series, std::slice::from_ref(fit), horizon, false, None)
    }

    /// Actual rows, then rows for the best fit (or every fit with
    /// `include_all`), then optional ensemble rows.
    pub fn assemble_ranked(
        &self,
        series: &TimeSeries,
        ranked: &[FitResult<'_>],
        horizon: Horizon,
        include_all: bool,
        ensemble_top: Option<usize>,
    ) -> Result<Assembly> {
        self.config.intervals.validate()?;
        let Some(best) = ranked.first() else {
            return Err(ForecastError::ComputationError(
                "no fitted model to extrapolate".to_string(),
            ));
        };
        let future = future_timestamps(series, best, horizon)?;

        let mut assembly = Assembly {
            rows: self.actual_rows(series),
            flags: Vec::new(),
        };

        let chosen = if include_all { ranked } else { &ranked[..1] };
        for fit in chosen {
            let forecast = fit.predict(&future);
            self.push_model_rows(
                &mut assembly,
                series,
                fit.model_name(),
                fit.fitted(),
                &fit.observed_residuals(),
                &future,
                &forecast,
            );
        }

        if let Some(ensemble) = ensemble_top.and_then(|k| Ensemble::from_ranked(ranked, k)) {
            let residuals: Vec<f64> = ensemble
                .residuals()
                .into_iter()
                .filter(|r| r.is_finite())
                .collect();
            self.push_model_rows(
                &mut assembly,
                series,
                ENSEMBLE_NAME,
                &ensemble.fitted(),
                &residuals,
                &future,
                &ensemble.predict(&future),
            );
        }

        Ok(assembly)
    }

    /// One row per observed timestamp with the original value.
    pub fn actual_rows(&self, series: &TimeSeries) -> Vec<ForecastRow> {
        series
            .observed_indices()
            .into_iter()
            .map(|i| {
                ForecastRow::actual(
                    series.timestamps()[i],
                    self.config.actuals_label.as_str(),
                    series.values()[i],
                )
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn push_model_rows(
        &self,
        assembly: &mut Assembly,
        series: &TimeSeries,
        name: &str,
        fitted: &[f64],
        residuals: &[f64],
        future: &[DateTime<Utc>],
        forecast: &[f64],
    ) {
        if self.config.include_fitted {
            assembly.rows.extend(
                series
                    .timestamps()
                    .iter()
                    .zip(fitted)
                    .map(|(t, v)| ForecastRow::predicted(*t, name, *v)),
            );
        }

        let spread = if self.config.intervals.levels.is_empty() {
            None
        } else {
            let spread = ResidualSpread::from_residuals(residuals, &self.config.intervals);
            if spread.is_none() {
                debug!(model = name, residuals = residuals.len(), "prediction intervals unavailable");
                assembly.flags.push(QualityFlag::IntervalUnavailable {
                    model: name.to_string(),
                });
            }
            spread
        };

        for (step, (t, v)) in future.iter().zip(forecast).enumerate() {
            let row = ForecastRow::predicted(*t, name, *v);
            let row = match &spread {
                Some(spread) if v.is_finite() => row.with_intervals(spread.intervals(*v, step + 1)),
                _ => row,
            };
            assembly.rows.push(row);
        }
    }
}

/// Timestamps after the last observation within `horizon`, at the fit's cadence.
///
/// The horizon is resolved and its last timestamp checked before anything
/// is allocated, so an oversized request fails fast.
pub fn future_timestamps(
    series: &TimeSeries,
    fit: &FitResult<'_>,
    horizon: Horizon,
) -> Result<Vec<DateTime<Utc>>> {
    let cadence = fit.cadence();
    let periods = horizon.periods(&cadence)?;
    if periods == 0 {
        return Ok(Vec::new());
    }
    let count = u32::try_from(periods).map_err(|_| {
        ForecastError::InvalidParameter(format!("horizon of {} periods is too long", periods))
    })?;
    let last = series.last_timestamp();
    cadence.advance(last, count)?;

    let mut future = Vec::with_capacity(periods);
    for k in 1..=count {
        future.push(cadence.advance(last, k)?);
    }
    Ok(future)
}
