//! Model catalog: the ordered list of model shapes to try.
//!
//! Each entry is a small expression of component names joined by `+`
//! (addition) or `*` (multiplication), read left to right:
//!
//! | token | component |
//! |---|---|
//! | `constant`, `y` | constant level |
//! | `linear` | linear trend |
//! | `exponential`, `exp` | exponential trend |
//! | `logistic`, `sigmoid`, `sigmoidal` | logistic growth |
//! | `log`, `logarithmic` | logarithmic trend |
//! | `weekday` | day-of-week effects |
//! | `month` | month-of-year effects |
//! | `fourier_weekly`, `fourier_yearly` | Fourier seasonality |
//! | `calendar` | event indicators (needs a calendar) |
//!
//! Seasonal terms joined with `*` are multiplicative. The first term must be a
//! trend. Catalog order is part of the ranking contract: it breaks ties.

use crate::core::{Cadence, EventCalendar};
use crate::error::{ForecastError, Result};
use crate::models::component::{ModelComponent, SeasonMode};
use crate::models::composite::{CompositeModel, Operator};
use std::sync::Arc;

const SECONDS_PER_DAY: f64 = 86_400.0;

const KNOWN_TOKENS: &[&str] = &[
    "constant",
    "y",
    "linear",
    "exponential",
    "exp",
    "logistic",
    "sigmoid",
    "sigmoidal",
    "log",
    "logarithmic",
    "weekday",
    "month",
    "fourier_weekly",
    "fourier_yearly",
    "calendar",
];

/// Calendar events available to the `calendar` token.
#[derive(Debug, Clone, Copy)]
pub struct EventTerms<'a> {
    pub calendar: &'a Arc<EventCalendar>,
    /// Event names to model, usually those active in the fitting window.
    pub names: &'a [String],
}

/// Ordered list of model expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    entries: Vec<String>,
}

impl ModelCatalog {
    /// Validate the entries' syntax and keep their order.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<String> = entries.into_iter().map(|e| e.into().trim().to_string()).collect();
        if entries.is_empty() {
            return Err(ForecastError::InvalidModelSpec(
                "model catalog is empty".to_string(),
            ));
        }
        for entry in &entries {
            if let Some((_, unknown)) = tokenize(entry)?
                .into_iter()
                .find(|(_, token)| !KNOWN_TOKENS.contains(&token.as_str()))
            {
                return Err(ForecastError::InvalidModelSpec(format!(
                    "unknown component '{}' in catalog entry '{}'",
                    unknown, entry
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Default catalog for a sampling cadence.
    ///
    /// Trend shapes are always tried. Sub-weekly cadences add weekday
    /// variants; cadences from daily up to monthly add month variants.
    pub fn default_for(cadence: &Cadence) -> Self {
        let step_days = cadence.approx_duration().num_seconds() as f64 / SECONDS_PER_DAY;
        let mut entries: Vec<&str> = vec!["constant", "linear", "exponential", "logistic", "log"];
        if step_days < 7.0 {
            entries.extend(["linear+weekday", "linear*weekday", "logistic*weekday"]);
        }
        if (1.0..=31.0).contains(&step_days) {
            entries.extend(["linear+month", "linear*month"]);
        }
        Self {
            entries: entries.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build every entry in catalog order.
    pub fn build(&self, events: Option<EventTerms<'_>>) -> Result<Vec<CompositeModel>> {
        self.entries.iter().map(|e| parse_model(e, events)).collect()
    }
}

/// Parse one catalog expression into a model named after the expression.
pub fn parse_model(entry: &str, events: Option<EventTerms<'_>>) -> Result<CompositeModel> {
    let tokens = tokenize(entry)?;
    let mut model: Option<CompositeModel> = None;

    for (op, token) in tokens {
        let mode = match op {
            Operator::Add => SeasonMode::Additive,
            Operator::Multiply => SeasonMode::Multiplicative,
        };
        let component = match token.as_str() {
            "constant" | "y" => ModelComponent::constant(),
            "linear" => ModelComponent::linear(),
            "exponential" | "exp" => ModelComponent::exponential(),
            "logistic" | "sigmoid" | "sigmoidal" => ModelComponent::logistic(),
            "log" | "logarithmic" => ModelComponent::logarithmic(),
            "weekday" => ModelComponent::weekday(mode),
            "month" => ModelComponent::month(mode),
            "fourier_weekly" => ModelComponent::fourier_weekly(mode),
            "fourier_yearly" => ModelComponent::fourier_yearly(mode),
            "calendar" => {
                if op == Operator::Multiply {
                    return Err(ForecastError::InvalidModelSpec(format!(
                        "'{}': calendar events can only be added",
                        entry
                    )));
                }
                let Some(events) = events else {
                    return Err(ForecastError::InvalidModelSpec(format!(
                        "'{}' uses calendar events but no calendar was supplied",
                        entry
                    )));
                };
                if events.names.is_empty() {
                    continue;
                }
                ModelComponent::calendar(Arc::clone(events.calendar), events.names.to_vec())
            }
            other => {
                return Err(ForecastError::InvalidModelSpec(format!(
                    "unknown component '{}' in catalog entry '{}'",
                    other, entry
                )))
            }
        };

        model = Some(match model {
            None if !component.is_trend() => {
                return Err(ForecastError::InvalidModelSpec(format!(
                    "catalog entry '{}' must start with a trend component",
                    entry
                )))
            }
            None => CompositeModel::new(entry, component),
            Some(m) => m.with_component(op, component),
        });
    }

    model.ok_or_else(|| ForecastError::InvalidModelSpec(format!("empty catalog entry '{}'", entry)))
}

/// Split an expression into `(operator, lowercase token)` pairs.
fn tokenize(entry: &str) -> Result<Vec<(Operator, String)>> {
    let mut tokens = Vec::new();
    let mut op = Operator::Add;
    let mut current = String::new();

    let mut push = |op: Operator, current: &mut String| -> Result<()> {
        let token = current.trim().to_ascii_lowercase();
        if token.is_empty() {
            return Err(ForecastError::InvalidModelSpec(format!(
                "malformed catalog entry '{}'",
                entry
            )));
        }
        tokens.push((op, token));
        current.clear();
        Ok(())
    };

    for ch in entry.chars() {
        match ch {
            '+' | '*' => {
                push(op, &mut current)?;
                op = if ch == '+' {
                    Operator::Add
                } else {
                    Operator::Multiply
                };
            }
            _ => current.push(ch),
        }
    }
    push(op, &mut current)?;
    Ok(tokens)
}
