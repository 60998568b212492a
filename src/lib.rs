//! # anofox-anticipate
//!
//! Time series forecasting by fitting and selecting among composable
//! parametric curve models.
//!
//! A forecast run cleans the series of outliers and level shifts, fits a
//! catalog of trend, seasonality, step and calendar-event models with bounded
//! nonlinear least squares, ranks the fits by an information criterion and
//! extrapolates the winner (or several, or an ensemble) with prediction
//! intervals.

// Allow some clippy warnings for cleaner code in specific cases
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]

pub mod assembly;
pub mod core;
pub mod detection;
pub mod error;
pub mod fitting;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod selection;
pub mod utils;

pub use error::{ForecastError, Result};

pub mod prelude {
    pub use crate::assembly::{ForecastAssembler, IntervalConfig};
    pub use crate::core::{EventCalendar, ForecastRow, Horizon, QualityFlag, TimeSeries};
    pub use crate::error::{ForecastError, Result};
    pub use crate::fitting::{FitConfig, FitResult, Fitter};
    pub use crate::models::{CompositeModel, ModelCatalog, ModelComponent};
    pub use crate::pipeline::{run_batch, run_forecast, ForecastConfig, ForecastRun};
    pub use crate::preprocess::{PreprocessConfig, SeriesPreprocessor};
    pub use crate::selection::{InformationCriterion, ModelSelector};
}
