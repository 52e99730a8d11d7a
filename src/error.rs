//! Domain error types for the backtest core.

use thiserror::Error;

/// Errors raised before or while preparing a simulation run.
///
/// Numeric degeneracy in the statistics (zero deviation, empty span,
/// unrecovered drawdown) is not an error; those surface as `None` in the
/// metrics report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    /// A configuration parameter is outside its valid range.
    #[error("Invalid configuration: {field} {reason}")]
    InvalidConfig {
        /// Name of the offending parameter.
        field: &'static str,
        /// Human readable constraint that was violated.
        reason: String,
    },

    /// The market series violates its ordering or price invariants.
    #[error("Invalid market series at bar {index}: {reason}")]
    InvalidSeries {
        /// Index of the first offending bar.
        index: usize,
        /// Description of the violation.
        reason: String,
    },

    /// A signal value outside {-1, 0, 1}.
    #[error("Invalid signal value: {0}")]
    InvalidSignal(i64),
}

impl BacktestError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn series(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidSeries {
            index,
            reason: reason.into(),
        }
    }
}
