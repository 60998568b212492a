//! Series preprocessing.
//!
//! [`SeriesPreprocessor`] replaces outliers with a local robust trend estimate
//! and either reports level shifts for modelling or levels them out. The
//! input series is never modified; every change is listed as an
//! [`AnomalyRecord`].

mod cleaner;
mod record;

pub use cleaner::{PreprocessConfig, SeriesPreprocessor, StepHandling};
pub use record::{AnomalyKind, AnomalyRecord, CleanedSeries, StepChange};
