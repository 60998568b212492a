//! Error types for the anofox-anticipate library.
//!
//! Only structural problems are errors. Numerical trouble (a fit that does not
//! converge, a series too short to clean, intervals that cannot be computed)
//! is reported as data through [`crate::core::QualityFlag`] so that a batch
//! of series can always complete.

use thiserror::Error;

/// Result type alias for forecast operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors that can occur during forecasting operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Malformed input series (empty, non-monotonic, all missing, non-finite).
    #[error("invalid series: {0}")]
    InvalidSeries(String),

    /// Unknown catalog entry or parameter arity mismatch.
    #[error("invalid model spec: {0}")]
    InvalidModelSpec(String),

    /// Insufficient data points for the operation.
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Cadence inference failed.
    #[error("could not infer frequency: {0}")]
    FrequencyInference(String),

    /// Computation error (e.g., numerical issues).
    #[error("computation error: {0}")]
    ComputationError(String),
}
