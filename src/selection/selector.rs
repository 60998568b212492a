//! Fit a catalog of candidate models and rank them.

use crate::core::{EventCalendar, TimeSeries};
use crate::error::{ForecastError, Result};
use crate::fitting::{FitConfig, FitData, FitResult, Fitter};
use crate::models::{CompositeModel, EventTerms, ModelCatalog, ModelComponent};
use crate::selection::criterion::rank_fits;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Suffix of the candidates that model detected level shifts.
pub const STEP_SUFFIX: &str = "+steps";

/// Configuration for [`ModelSelector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub fit: FitConfig,
    /// Fit candidates on the rayon thread pool. The ranking is identical
    /// either way.
    pub parallel: bool,
    /// Keep at most this many ranked fits.
    pub max_ranked: Option<usize>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            fit: FitConfig::default(),
            parallel: true,
            max_ranked: None,
        }
    }
}

impl SelectorConfig {
    pub fn with_fit(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_max_ranked(mut self, max_ranked: usize) -> Self {
        self.max_ranked = Some(max_ranked);
        self
    }
}

/// Fits candidate models and orders them by preference.
///
/// Candidate construction and fitting are separate steps so that fit results
/// can borrow the candidate definitions:
///
/// ```
/// use anofox_anticipate::core::TimeSeries;
/// use anofox_anticipate::models::ModelCatalog;
/// use anofox_anticipate::selection::ModelSelector;
/// use chrono::{Duration, TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
/// let timestamps = (0..5).map(|i| start + Duration::days(i)).collect();
/// let series = TimeSeries::new(timestamps, vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
///
/// let selector = ModelSelector::default();
/// let catalog = ModelCatalog::new(["y", "linear"]).unwrap();
/// let candidates = selector.candidates(&catalog, &series, None, &[]).unwrap();
/// let ranked = selector.select(&series, &candidates).unwrap();
///
/// assert_eq!(ranked[0].model_name(), "linear");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    config: SelectorConfig,
}

impl ModelSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Build the candidate models for `series`, in catalog order.
    ///
    /// With a calendar, every candidate gains an additive event term over the
    /// events active in the observed window (unless it already has one). With
    /// level-shift timestamps, each candidate is followed by a sibling named
    /// `<entry>+steps` carrying one step term per shift right after its
    /// leading trend.
    pub fn candidates(
        &self,
        catalog: &ModelCatalog,
        series: &TimeSeries,
        calendar: Option<&Arc<EventCalendar>>,
        step_times: &[DateTime<Utc>],
    ) -> Result<Vec<CompositeModel>> {
        let observed: Vec<DateTime<Utc>> = series
            .observed_indices()
            .into_iter()
            .map(|i| series.timestamps()[i])
            .collect();
        let names: Vec<String> = calendar
            .map(|c| c.names_active_in(&observed))
            .unwrap_or_default();
        let events = calendar.map(|calendar| EventTerms {
            calendar,
            names: &names,
        });

        let mut models = catalog.build(events)?;
        if let Some(calendar) = calendar {
            if !names.is_empty() {
                models = models
                    .into_iter()
                    .map(|m| {
                        if m.has_calendar() {
                            m
                        } else {
                            m.add(ModelComponent::calendar(Arc::clone(calendar), names.clone()))
                        }
                    })
                    .collect();
            }
        }

        if step_times.is_empty() {
            return Ok(models);
        }

        let cadence = series.infer_cadence()?;
        let origin = series.first_timestamp();
        let offsets: Vec<f64> = step_times
            .iter()
            .map(|t| cadence.offset(origin, *t))
            .collect();

        let mut with_steps = Vec::with_capacity(models.len() * 2);
        for model in models {
            let sibling = with_level_shifts(&model, &offsets);
            with_steps.push(model);
            with_steps.push(sibling);
        }
        Ok(with_steps)
    }

    /// Fit every candidate and return the fits in preference order.
    ///
    /// Structural problems with the series fail before any fitting starts.
    /// Individual fits never fail; a fit that did not converge ranks last.
    pub fn select<'m>(
        &self,
        series: &TimeSeries,
        candidates: &'m [CompositeModel],
    ) -> Result<Vec<FitResult<'m>>> {
        if candidates.is_empty() {
            return Err(ForecastError::InvalidModelSpec(
                "no candidate models to fit".to_string(),
            ));
        }
        let data = FitData::new(series, series.infer_cadence()?, None)?;
        let fitter = Fitter::new(self.config.fit.clone());

        let mut fits: Vec<FitResult<'m>> = if self.config.parallel {
            candidates
                .par_iter()
                .map(|m| fitter.fit_prepared(m, &data))
                .collect()
        } else {
            candidates
                .iter()
                .map(|m| fitter.fit_prepared(m, &data))
                .collect()
        };

        rank_fits(&mut fits);
        if let Some(max) = self.config.max_ranked {
            fits.truncate(max.max(1));
        }

        debug!(
            candidates = candidates.len(),
            best = fits.first().map(|f| f.model_name()),
            best_score = fits.first().map(|f| f.score()),
            "models ranked"
        );
        Ok(fits)
    }

    /// Fit the candidates and return only the preferred fit.
    pub fn best<'m>(
        &self,
        series: &TimeSeries,
        candidates: &'m [CompositeModel],
    ) -> Result<FitResult<'m>> {
        self.select(series, candidates)?
            .into_iter()
            .next()
            .ok_or_else(|| ForecastError::ComputationError("no model was fitted".to_string()))
    }
}

/// Copy of `model` with step terms inserted after its leading trend.
fn with_level_shifts(model: &CompositeModel, offsets: &[f64]) -> CompositeModel {
    let mut terms = model.terms().iter();
    let name = format!("{}{}", model.name(), STEP_SUFFIX);
    let Some((_, lead)) = terms.next() else {
        return model.clone().with_name(name);
    };
    let mut shifted = CompositeModel::new(name, lead.clone());
    for &at in offsets {
        shifted = shifted.add(ModelComponent::step(at));
    }
    for (op, component) in terms {
        shifted = shifted.with_component(*op, component.clone());
    }
    shifted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CalendarEvent;
    use crate::models::{ComponentKind, Operator};
    use chrono::{Duration, TimeZone};

    fn daily_series(values: Vec<f64>) -> TimeSeries {
        let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        let ts = (0..values.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        TimeSeries::new(ts, values).unwrap()
    }

    #[test]
    fn linear_beats_constant_on_a_line() {
        let series = daily_series(vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let selector = ModelSelector::default();
        let catalog = ModelCatalog::new(["y", "linear"]).unwrap();
        let candidates = selector.candidates(&catalog, &series, None, &[]).unwrap();
        let ranked = selector.select(&series, &candidates).unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].model_name(), "linear");
        assert!(ranked[0].score() < ranked[1].score());
    }

    #[test]
    fn ties_fall_back_to_parameters_then_catalog_order() {
        // Two identical one-parameter models: catalog order decides.
        let series = daily_series(vec![3.0; 10]);
        let selector = ModelSelector::default();
        let catalog = ModelCatalog::new(["constant", "y", "linear"]).unwrap();
        let candidates = selector.candidates(&catalog, &series, None, &[]).unwrap();
        let ranked = selector.select(&series, &candidates).unwrap();

        let names: Vec<&str> = ranked.iter().map(|f| f.model_name()).collect();
        assert_eq!(names, vec!["constant", "y", "linear"]);
    }

    #[test]
    fn parallel_and_sequential_rankings_agree() {
        let values: Vec<f64> = (0..60)
            .map(|i| 10.0 + 0.2 * i as f64 + (i as f64 * 0.9).sin())
            .collect();
        let series = daily_series(values);
        let catalog = ModelCatalog::default_for(&series.infer_cadence().unwrap());

        let parallel = ModelSelector::default();
        let sequential = ModelSelector::new(SelectorConfig::default().with_parallel(false));
        let candidates = parallel.candidates(&catalog, &series, None, &[]).unwrap();

        let a = parallel.select(&series, &candidates).unwrap();
        let b = sequential.select(&series, &candidates).unwrap();
        let names_a: Vec<&str> = a.iter().map(|f| f.model_name()).collect();
        let names_b: Vec<&str> = b.iter().map(|f| f.model_name()).collect();
        assert_eq!(names_a, names_b);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.params(), y.params());
        }
    }

    #[test]
    fn step_siblings_follow_their_base_model() {
        let series = daily_series((0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect());
        let selector = ModelSelector::default();
        let catalog = ModelCatalog::new(["linear", "linear*weekday"]).unwrap();
        let shift = series.timestamps()[10];
        let candidates = selector
            .candidates(&catalog, &series, None, &[shift])
            .unwrap();

        let names: Vec<&str> = candidates.iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec!["linear", "linear+steps", "linear*weekday", "linear*weekday+steps"]
        );
        let terms = candidates[3].terms();
        assert_eq!(terms[1].1.kind(), &ComponentKind::Step { at: 10.0 });
        assert_eq!(terms[2].0, Operator::Multiply);

        let ranked = selector.select(&series, &candidates).unwrap();
        assert!(ranked[0].model_name().ends_with(STEP_SUFFIX));
    }

    #[test]
    fn calendar_terms_are_added_for_active_events() {
        let series = daily_series((0..20).map(|i| if i == 5 || i == 12 { 9.0 } else { 2.0 }).collect());
        let ts = series.timestamps();
        let calendar = Arc::new(
            EventCalendar::new(vec![
                CalendarEvent::new("promo", ts[5], ts[5]).unwrap(),
                CalendarEvent::new("promo", ts[12], ts[12]).unwrap(),
                CalendarEvent::new("future", ts[19] + Duration::days(30), ts[19] + Duration::days(31))
                    .unwrap(),
            ])
            .unwrap(),
        );
        let selector = ModelSelector::default();
        let catalog = ModelCatalog::new(["constant"]).unwrap();
        let candidates = selector
            .candidates(&catalog, &series, Some(&calendar), &[])
            .unwrap();

        assert_eq!(candidates[0].name(), "constant");
        assert!(candidates[0].has_calendar());
        assert_eq!(candidates[0].n_params(), 2);

        let best = selector.best(&series, &candidates).unwrap();
        assert!((best.params()[1] - 7.0).abs() < 1e-6);
    }

    #[test]
    fn select_rejects_empty_candidate_list() {
        let series = daily_series(vec![1.0, 2.0, 3.0]);
        assert!(ModelSelector::default().select(&series, &[]).is_err());
    }
}
