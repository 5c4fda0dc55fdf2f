//! Statistical primitives for the signal layer.

pub mod stats;

pub use stats::{mean, ols_slope, pearson_correlation, sample_std_dev, z_score};
