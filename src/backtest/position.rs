//! Two-leg synthetic position and its profit-and-loss algebra.

use crate::backtest::data::{Bar, Signal};
use crate::backtest::BacktestConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an open premium position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Long spot, short futures.
    Long,
    /// Short spot, long futures.
    Short,
}

impl Direction {
    /// Direction implied by a signal; `None` for a flat signal.
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::Long => Some(Direction::Long),
            Signal::Short => Some(Direction::Short),
            Signal::Flat => None,
        }
    }

    /// The signal that points the opposite way.
    pub fn opposite_signal(self) -> Signal {
        match self {
            Direction::Long => Signal::Short,
            Direction::Short => Signal::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Liquidated,
    TakeProfit,
    StopLoss,
    Reversal,
}

impl ExitReason {
    pub const ALL: [ExitReason; 4] = [
        ExitReason::Liquidated,
        ExitReason::TakeProfit,
        ExitReason::StopLoss,
        ExitReason::Reversal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Liquidated => "liquidated",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Reversal => "reversal",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-leg cost fractions (fee plus slippage) applied on each fill.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostModel {
    pub spot: f64,
    pub futures: f64,
}

impl CostModel {
    /// Build the effective costs from the backtest switches.
    pub fn from_config(config: &BacktestConfig) -> Self {
        let fee_spot = if config.enable_fee { config.fee_rate_spot } else { 0.0 };
        let fee_future = if config.enable_fee { config.fee_rate_future } else { 0.0 };
        let slippage = if config.enable_slippage { config.slippage } else { 0.0 };

        Self {
            spot: fee_spot + slippage,
            futures: fee_future + slippage,
        }
    }

    /// A model with no trading costs.
    pub fn frictionless() -> Self {
        Self::default()
    }
}

/// Return of the bought leg: bought at entry, sold at exit.
///
/// Costs hit both fills multiplicatively.
fn bought_leg(entry: f64, exit: f64, cost: f64) -> f64 {
    (exit / entry) * (1.0 - cost).powi(2) - 1.0
}

/// Return of the sold leg: sold at entry, bought back at exit.
fn sold_leg(entry: f64, exit: f64, cost: f64) -> f64 {
    (1.0 - cost) - (exit / entry) / (1.0 - cost)
}

/// Fractional PnL of a two-leg position.
///
/// Half the allocation sits on the spot leg and half on the futures leg; the
/// futures half is scaled by `leverage`.
pub fn position_pnl(
    direction: Direction,
    entry_spot: f64,
    entry_futures: f64,
    exit_spot: f64,
    exit_futures: f64,
    leverage: f64,
    costs: CostModel,
) -> f64 {
    let (spot_leg, futures_leg) = match direction {
        Direction::Long => (
            bought_leg(entry_spot, exit_spot, costs.spot),
            sold_leg(entry_futures, exit_futures, costs.futures),
        ),
        Direction::Short => (
            sold_leg(entry_spot, exit_spot, costs.spot),
            bought_leg(entry_futures, exit_futures, costs.futures),
        ),
    };

    spot_leg * 0.5 + futures_leg * 0.5 * leverage
}

/// The currently open position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenPosition {
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_spot_price: f64,
    pub entry_futures_price: f64,
    /// Capital allocated at open.
    pub size: f64,
    pub leverage: f64,
    /// Free capital just before the allocation was deducted.
    pub capital_at_entry: f64,
}

impl OpenPosition {
    /// Open a position on the given bar.
    pub fn open(direction: Direction, bar: &Bar, size: f64, leverage: f64, capital: f64) -> Self {
        Self {
            direction,
            entry_time: bar.timestamp,
            entry_spot_price: bar.spot_price,
            entry_futures_price: bar.futures_price,
            size,
            leverage,
            capital_at_entry: capital,
        }
    }

    /// Mark-to-market PnL if closed at the bar's prices.
    pub fn pnl_at(&self, bar: &Bar, costs: CostModel) -> f64 {
        position_pnl(
            self.direction,
            self.entry_spot_price,
            self.entry_futures_price,
            bar.spot_price,
            bar.futures_price,
            self.leverage,
            costs,
        )
    }

    /// Decide whether the position must close at this bar.
    ///
    /// Checks run in priority order: liquidation, take-profit/stop-loss, then
    /// a profitable reversal signal.
    pub fn exit_reason(
        &self,
        pnl: f64,
        signal: Signal,
        take_profit: f64,
        stop_loss: f64,
    ) -> Option<ExitReason> {
        if pnl < -1.0 {
            Some(ExitReason::Liquidated)
        } else if pnl >= take_profit {
            Some(ExitReason::TakeProfit)
        } else if pnl <= -stop_loss {
            Some(ExitReason::StopLoss)
        } else if signal == self.direction.opposite_signal() && pnl > 0.0 {
            Some(ExitReason::Reversal)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(spot: f64, futures: f64, signal: Signal) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            spot,
            futures,
            signal,
        )
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_unchanged_prices_without_costs_is_zero() {
        for direction in [Direction::Long, Direction::Short] {
            let pnl = position_pnl(
                direction,
                42000.0,
                41950.0,
                42000.0,
                41950.0,
                20.0,
                CostModel::frictionless(),
            );
            assert_eq!(pnl, 0.0);
        }
    }

    #[test]
    fn test_long_pnl_formula() {
        let costs = CostModel {
            spot: 0.0015,
            futures: 0.0006,
        };
        let pnl = position_pnl(Direction::Long, 100.0, 101.0, 102.0, 100.5, 3.0, costs);

        let spot_leg = (102.0 / 100.0) * (1.0 - 0.0015_f64).powi(2) - 1.0;
        let futures_leg = (1.0 - 0.0006) - (100.5 / 101.0) / (1.0 - 0.0006);
        assert!(approx(pnl, 0.5 * spot_leg + 0.5 * 3.0 * futures_leg));
    }

    #[test]
    fn test_short_pnl_formula() {
        let costs = CostModel {
            spot: 0.0015,
            futures: 0.0006,
        };
        let pnl = position_pnl(Direction::Short, 100.0, 101.0, 99.0, 101.7, 2.0, costs);

        let spot_leg = (1.0 - 0.0015) - (99.0 / 100.0) / (1.0 - 0.0015);
        let futures_leg = (101.7 / 101.0) * (1.0 - 0.0006_f64).powi(2) - 1.0;
        assert!(approx(pnl, 0.5 * spot_leg + 0.5 * 2.0 * futures_leg));
    }

    #[test]
    fn test_costs_make_round_trip_negative() {
        let costs = CostModel {
            spot: 0.001,
            futures: 0.001,
        };
        for direction in [Direction::Long, Direction::Short] {
            let pnl = position_pnl(direction, 100.0, 100.0, 100.0, 100.0, 1.0, costs);
            assert!(pnl < 0.0);
        }
    }

    #[test]
    fn test_cost_model_switches() {
        let mut config = BacktestConfig {
            fee_rate_spot: 0.001,
            fee_rate_future: 0.0001,
            slippage: 0.0005,
            enable_fee: false,
            enable_slippage: false,
            ..BacktestConfig::default()
        };
        assert_eq!(CostModel::from_config(&config), CostModel::frictionless());

        config.enable_slippage = true;
        let costs = CostModel::from_config(&config);
        assert_eq!(costs.spot, 0.0005);
        assert_eq!(costs.futures, 0.0005);

        config.enable_fee = true;
        let costs = CostModel::from_config(&config);
        assert!(approx(costs.spot, 0.0015));
        assert!(approx(costs.futures, 0.0006));
    }

    #[test]
    fn test_exit_priority_liquidation_first() {
        let position = OpenPosition::open(
            Direction::Long,
            &bar(100.0, 100.0, Signal::Long),
            1000.0,
            20.0,
            10000.0,
        );

        // A liquidating pnl also satisfies the stop-loss condition.
        assert_eq!(
            position.exit_reason(-1.5, Signal::Short, 0.02, 0.03),
            Some(ExitReason::Liquidated)
        );
        assert_eq!(
            position.exit_reason(-0.5, Signal::Flat, 0.02, 0.03),
            Some(ExitReason::StopLoss)
        );
    }

    #[test]
    fn test_take_profit_before_reversal() {
        let position = OpenPosition::open(
            Direction::Short,
            &bar(100.0, 100.0, Signal::Short),
            1000.0,
            1.0,
            10000.0,
        );

        assert_eq!(
            position.exit_reason(0.05, Signal::Long, 0.02, 0.03),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(
            position.exit_reason(0.01, Signal::Long, 0.02, 0.03),
            Some(ExitReason::Reversal)
        );
    }

    #[test]
    fn test_reversal_requires_profit_and_opposite_signal() {
        let position = OpenPosition::open(
            Direction::Long,
            &bar(100.0, 100.0, Signal::Long),
            1000.0,
            1.0,
            10000.0,
        );

        assert_eq!(position.exit_reason(-0.01, Signal::Short, 0.02, 0.03), None);
        assert_eq!(position.exit_reason(0.0, Signal::Short, 0.02, 0.03), None);
        assert_eq!(position.exit_reason(0.01, Signal::Long, 0.02, 0.03), None);
        assert_eq!(position.exit_reason(0.01, Signal::Flat, 0.02, 0.03), None);
    }

    #[test]
    fn test_threshold_boundaries_are_inclusive() {
        let position = OpenPosition::open(
            Direction::Long,
            &bar(100.0, 100.0, Signal::Long),
            1000.0,
            1.0,
            10000.0,
        );

        assert_eq!(
            position.exit_reason(0.02, Signal::Flat, 0.02, 0.03),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(
            position.exit_reason(-0.03, Signal::Flat, 0.02, 0.03),
            Some(ExitReason::StopLoss)
        );
        // Exactly -1 is a stop-loss, not a liquidation.
        assert_eq!(
            position.exit_reason(-1.0, Signal::Flat, 0.02, 0.03),
            Some(ExitReason::StopLoss)
        );
    }
}
