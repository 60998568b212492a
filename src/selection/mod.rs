//! Model selection: fit a catalog, score each fit, rank or ensemble the results.

mod criterion;
mod ensemble;
mod selector;

pub use criterion::{compare_fits, rank_fits, InformationCriterion};
pub use ensemble::{akaike_weights, Ensemble};
pub use selector::{ModelSelector, SelectorConfig, STEP_SUFFIX};
