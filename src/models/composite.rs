//! Composite models: components chained by addition or multiplication.

use crate::core::TimeGrid;
use crate::error::{ForecastError, Result};
use crate::models::component::{Bounds, ComponentKind, GuessContext, ModelComponent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// How a term combines with everything to its left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Multiply,
}

impl Operator {
    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Multiply => '*',
        }
    }

    fn apply(self, acc: f64, value: f64) -> f64 {
        match self {
            Operator::Add => acc + value,
            Operator::Multiply => acc * value,
        }
    }
}

/// An ordered chain of components.
///
/// Evaluation folds left to right: `((c0 op1 c1) op2 c2) ...`. The operator
/// of the first term is ignored. The parameter vector is the concatenation of
/// the components' parameters in term order, so terms must never be
/// reordered once a fit exists.
///
/// # Example
///
/// ```
/// use anofox_anticipate::models::{CompositeModel, ModelComponent, SeasonMode};
///
/// let model = CompositeModel::new("linear*weekday", ModelComponent::linear())
///     .multiply(ModelComponent::weekday(SeasonMode::Multiplicative));
/// assert_eq!(model.n_params(), 8);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeModel {
    name: String,
    terms: Vec<(Operator, ModelComponent)>,
}

impl CompositeModel {
    /// Model with a single leading component.
    pub fn new(name: impl Into<String>, first: ModelComponent) -> Self {
        Self {
            name: name.into(),
            terms: vec![(Operator::Add, first)],
        }
    }

    /// Append a term combined by addition.
    pub fn add(mut self, component: ModelComponent) -> Self {
        self.terms.push((Operator::Add, component));
        self
    }

    /// Append a term combined by multiplication.
    pub fn multiply(mut self, component: ModelComponent) -> Self {
        self.terms.push((Operator::Multiply, component));
        self
    }

    /// Append a term with an explicit operator.
    pub fn with_component(mut self, op: Operator, component: ModelComponent) -> Self {
        self.terms.push((op, component));
        self
    }

    /// Rename the model.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn terms(&self) -> &[(Operator, ModelComponent)] {
        &self.terms
    }

    pub fn components(&self) -> impl Iterator<Item = &ModelComponent> {
        self.terms.iter().map(|(_, c)| c)
    }

    /// Total number of free parameters.
    pub fn n_params(&self) -> usize {
        self.components().map(ModelComponent::arity).sum()
    }

    /// Whether any term already models calendar events.
    pub fn has_calendar(&self) -> bool {
        self.components()
            .any(|c| matches!(c.kind(), ComponentKind::Calendar { .. }))
    }

    /// Whether any term has a multi-basin least-squares surface.
    pub fn is_multimodal(&self) -> bool {
        self.components().any(ModelComponent::is_multimodal)
    }

    /// Parameter ranges of each term within the full parameter vector.
    pub fn param_slices(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.components()
            .map(|c| {
                let range = start..start + c.arity();
                start = range.end;
                range
            })
            .collect()
    }

    /// Concatenated per-parameter bounds.
    pub fn bounds(&self) -> Vec<Bounds> {
        self.components().flat_map(|c| c.bounds()).collect()
    }

    /// Evaluate the model on `grid`.
    ///
    /// Fails with [`ForecastError::InvalidModelSpec`] when `params` does not
    /// have exactly [`n_params`](Self::n_params) entries.
    pub fn evaluate(&self, grid: &TimeGrid, params: &[f64]) -> Result<Vec<f64>> {
        if params.len() != self.n_params() {
            return Err(ForecastError::InvalidModelSpec(format!(
                "model '{}' takes {} parameters, got {}",
                self.name,
                self.n_params(),
                params.len()
            )));
        }
        Ok(self.evaluate_unchecked(grid, params))
    }

    /// Evaluate without the arity check; used inside the optimizer loop.
    pub(crate) fn evaluate_unchecked(&self, grid: &TimeGrid, params: &[f64]) -> Vec<f64> {
        let mut acc = vec![0.0; grid.len()];
        for (i, ((op, component), range)) in
            self.terms.iter().zip(self.param_slices()).enumerate()
        {
            let values = component.evaluate(grid, &params[range]);
            if i == 0 {
                acc = values;
            } else {
                for (a, v) in acc.iter_mut().zip(values) {
                    *a = op.apply(*a, v);
                }
            }
        }
        acc
    }

    /// Concatenated initial guesses, clamped into the bounds.
    pub fn initial_guess(&self, ctx: &GuessContext<'_>) -> Vec<f64> {
        self.terms
            .iter()
            .enumerate()
            .flat_map(|(i, (op, c))| c.initial_guess(ctx, i == 0, *op == Operator::Multiply))
            .collect()
    }
}

impl fmt::Display for CompositeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
