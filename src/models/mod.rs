//! Parametric curve models.
//!
//! A [`CompositeModel`] chains [`ModelComponent`]s with `+` and `*`; the
//! [`ModelCatalog`] turns model expressions such as `linear*weekday` into
//! composite models.

pub mod catalog;
pub mod component;
pub mod composite;

pub use catalog::{parse_model, EventTerms, ModelCatalog};
pub use component::{Bounds, ComponentKind, GuessContext, ModelComponent, SeasonMode};
pub use composite::{CompositeModel, Operator};
