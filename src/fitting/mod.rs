//! Parameter estimation for composite models.
//!
//! The [`Fitter`] minimises the (optionally weighted) sum of squared residuals
//! over the observed points with bounded Levenberg-Marquardt by default.
//! Multi-basin models are refitted from seeded perturbed starts, and a
//! per-fit wall-clock budget bounds the whole search.

mod fitter;
mod result;

pub use fitter::{FitConfig, FitData, Fitter, Solver};
pub use result::FitResult;
