//! Numerical utilities shared by fitting, detection and assembly.

pub mod linalg;
pub mod optimization;
pub mod stats;

pub use optimization::{
    levenberg_marquardt, nelder_mead, LeastSquaresConfig, NelderMeadConfig, OptimizationResult,
    Termination,
};
pub use stats::{centered_median, mad, median, quantile, robust_sigma, theil_sen, MAD_TO_SIGMA};
