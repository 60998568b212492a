//! Forecast table assembly.
//!
//! [`ForecastAssembler`] extrapolates ranked fits past the last observation
//! and merges them with the actuals. Prediction intervals come from the
//! in-sample residuals of each fit and widen with forecast distance.

mod assembler;
mod intervals;

pub use assembler::{future_timestamps, AssemblerConfig, Assembly, ForecastAssembler, ENSEMBLE_NAME};
pub use intervals::{IntervalConfig, IntervalMethod, ResidualSpread};
