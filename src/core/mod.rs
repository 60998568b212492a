//! Core data structures for time series forecasting.

mod calendar;
mod forecast;
mod time_series;

pub use calendar::{CalendarEvent, EventCalendar};
pub use forecast::{ForecastRow, PredictionInterval, QualityFlag};
pub use time_series::{Cadence, Horizon, TimeGrid, TimeSeries, MAX_HORIZON_PERIODS};
