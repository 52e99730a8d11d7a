//! Shared numeric helpers.

pub mod stats;

pub use stats::{cumulative_sum, mean, rolling_mean, rolling_std, running_max, sample_std};
