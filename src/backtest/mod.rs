//! Backtesting module for the spot/futures premium strategy.
//!
//! This module provides:
//! - Bar series with validated ordering and prices (CSV import/export)
//! - Two-leg position PnL with fee and slippage costs
//! - Bar-by-bar simulation engine
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use premium_arb::backtest::{BacktestConfig, BacktestEngine, CsvBarLoader, DataLoader};
//!
//! let series = CsvBarLoader::new("data/bars.csv")?.load_series(None, None)?;
//! let mut engine = BacktestEngine::new(BacktestConfig::default())?;
//!
//! let result = engine.run(&series);
//! println!("{}", result.report);
//! ```

mod data;
mod engine;
mod ledger;
mod metrics;
mod position;

pub use data::{Bar, CsvBarLoader, DataLoader, MarketSeries, Signal};
pub use engine::{BacktestEngine, BacktestResult, StepEvent};
pub use ledger::{hours_between, ClosedTrade, TradeLedger};
pub use metrics::{BacktestMetrics, ExitBreakdown, MetricsReport};
pub use position::{position_pnl, CostModel, Direction, ExitReason, OpenPosition};

use crate::error::BacktestError;
use serde::{Deserialize, Serialize};

/// When a new position may open after one closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentryPolicy {
    /// The closing bar never opens a new position.
    #[default]
    NextBar,
    /// The closing bar's signal may open a new position immediately.
    SameBar,
}

/// Configuration for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting free capital
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    /// Fraction of free capital allocated per position, in (0, 1]
    #[serde(default = "default_position_ratio")]
    pub position_ratio: f64,

    /// Multiplier on the futures leg
    #[serde(default = "default_leverage")]
    pub leverage: f64,

    /// Close when PnL reaches this fraction
    #[serde(default = "default_take_profit")]
    pub take_profit: f64,

    /// Close when PnL falls to minus this fraction
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,

    #[serde(default = "default_fee_rate_spot")]
    pub fee_rate_spot: f64,

    #[serde(default = "default_fee_rate_future")]
    pub fee_rate_future: f64,

    /// Per-fill slippage, applied to both legs
    #[serde(default = "default_slippage")]
    pub slippage: f64,

    #[serde(default)]
    pub enable_fee: bool,

    #[serde(default)]
    pub enable_slippage: bool,

    #[serde(default)]
    pub reentry: ReentryPolicy,
}

fn default_initial_capital() -> f64 {
    10000.0
}
fn default_position_ratio() -> f64 {
    0.5
}
fn default_leverage() -> f64 {
    20.0
}
fn default_take_profit() -> f64 {
    0.001
}
fn default_stop_loss() -> f64 {
    0.002
}
fn default_fee_rate_spot() -> f64 {
    0.001
}
fn default_fee_rate_future() -> f64 {
    0.0001
}
fn default_slippage() -> f64 {
    0.001
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            position_ratio: default_position_ratio(),
            leverage: default_leverage(),
            take_profit: default_take_profit(),
            stop_loss: default_stop_loss(),
            fee_rate_spot: default_fee_rate_spot(),
            fee_rate_future: default_fee_rate_future(),
            slippage: default_slippage(),
            enable_fee: false,
            enable_slippage: false,
            reentry: ReentryPolicy::default(),
        }
    }
}

impl BacktestConfig {
    /// Reject parameters the simulation cannot run with.
    pub fn validate(&self) -> Result<(), BacktestError> {
        let values = [
            ("initial_capital", self.initial_capital),
            ("position_ratio", self.position_ratio),
            ("leverage", self.leverage),
            ("take_profit", self.take_profit),
            ("stop_loss", self.stop_loss),
            ("fee_rate_spot", self.fee_rate_spot),
            ("fee_rate_future", self.fee_rate_future),
            ("slippage", self.slippage),
        ];
        for (field, value) in values {
            if !value.is_finite() {
                return Err(BacktestError::config(field, format!("must be finite, got {value}")));
            }
        }

        if self.initial_capital <= 0.0 {
            return Err(BacktestError::config(
                "initial_capital",
                format!("must be positive, got {}", self.initial_capital),
            ));
        }
        if self.position_ratio <= 0.0 || self.position_ratio > 1.0 {
            return Err(BacktestError::config(
                "position_ratio",
                format!("must be in (0, 1], got {}", self.position_ratio),
            ));
        }
        if self.leverage < 1.0 {
            return Err(BacktestError::config(
                "leverage",
                format!("must be at least 1, got {}", self.leverage),
            ));
        }
        if self.take_profit <= 0.0 {
            return Err(BacktestError::config(
                "take_profit",
                format!("must be positive, got {}", self.take_profit),
            ));
        }
        if self.stop_loss <= 0.0 {
            return Err(BacktestError::config(
                "stop_loss",
                format!("must be positive, got {}", self.stop_loss),
            ));
        }

        for (field, value) in [
            ("fee_rate_spot", self.fee_rate_spot),
            ("fee_rate_future", self.fee_rate_future),
            ("slippage", self.slippage),
        ] {
            if value < 0.0 {
                return Err(BacktestError::config(
                    field,
                    format!("must not be negative, got {value}"),
                ));
            }
        }

        let costs = CostModel::from_config(self);
        if costs.spot >= 1.0 || costs.futures >= 1.0 {
            return Err(BacktestError::config(
                "slippage",
                "combined fee and slippage must stay below 1",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BacktestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reentry, ReentryPolicy::NextBar);
        assert!(!config.enable_fee);
        assert!(!config.enable_slippage);
    }

    #[test]
    fn test_position_ratio_bounds() {
        for ratio in [0.0, -0.1, 1.5, f64::NAN] {
            let config = BacktestConfig {
                position_ratio: ratio,
                ..BacktestConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(BacktestError::InvalidConfig { field: "position_ratio", .. })
            ));
        }

        let full = BacktestConfig {
            position_ratio: 1.0,
            ..BacktestConfig::default()
        };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_thresholds_and_leverage() {
        let cases = [
            (
                BacktestConfig {
                    initial_capital: 0.0,
                    ..BacktestConfig::default()
                },
                "initial_capital",
            ),
            (
                BacktestConfig {
                    leverage: 0.5,
                    ..BacktestConfig::default()
                },
                "leverage",
            ),
            (
                BacktestConfig {
                    take_profit: 0.0,
                    ..BacktestConfig::default()
                },
                "take_profit",
            ),
            (
                BacktestConfig {
                    stop_loss: -0.01,
                    ..BacktestConfig::default()
                },
                "stop_loss",
            ),
            (
                BacktestConfig {
                    fee_rate_spot: -0.001,
                    ..BacktestConfig::default()
                },
                "fee_rate_spot",
            ),
        ];

        for (config, expected) in cases {
            match config.validate() {
                Err(BacktestError::InvalidConfig { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {expected} error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_rejects_costs_that_consume_the_fill() {
        let config = BacktestConfig {
            slippage: 1.0,
            enable_slippage: true,
            ..BacktestConfig::default()
        };
        assert!(config.validate().is_err());

        // Disabled costs are not checked against the bound.
        let disabled = BacktestConfig {
            slippage: 1.0,
            enable_slippage: false,
            ..BacktestConfig::default()
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: BacktestConfig =
            serde_json::from_str(r#"{"leverage": 5.0, "reentry": "same_bar"}"#).unwrap();
        assert_eq!(config.leverage, 5.0);
        assert_eq!(config.reentry, ReentryPolicy::SameBar);
        assert_eq!(config.initial_capital, 10000.0);
        assert_eq!(config.take_profit, 0.001);
    }
}
