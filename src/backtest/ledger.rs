//! Append-only record of closed trades.

use crate::backtest::position::{Direction, ExitReason, OpenPosition};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A completed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub duration_hours: f64,
    /// Fractional return of the allocation (1.0 = 100%).
    pub pnl: f64,
    pub exit_reason: ExitReason,
    pub entry_spot_price: f64,
    pub entry_futures_price: f64,
    pub exit_spot_price: f64,
    pub exit_futures_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub capital_at_entry: f64,
    /// Free capital right after this trade was settled.
    pub capital_after_close: f64,
}

impl ClosedTrade {
    /// Settle an open position at the given exit prices.
    #[allow(clippy::too_many_arguments)]
    pub fn settle(
        position: &OpenPosition,
        exit_time: DateTime<Utc>,
        exit_spot_price: f64,
        exit_futures_price: f64,
        pnl: f64,
        exit_reason: ExitReason,
        capital_after_close: f64,
    ) -> Self {
        Self {
            direction: position.direction,
            entry_time: position.entry_time,
            exit_time,
            duration_hours: hours_between(position.entry_time, exit_time),
            pnl,
            exit_reason,
            entry_spot_price: position.entry_spot_price,
            entry_futures_price: position.entry_futures_price,
            exit_spot_price,
            exit_futures_price,
            size: position.size,
            leverage: position.leverage,
            capital_at_entry: position.capital_at_entry,
            capital_after_close,
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Elapsed hours between two instants.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

/// Ordered sequence of closed trades, in close order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeLedger {
    trades: Vec<ClosedTrade>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trade.
    pub fn record(&mut self, trade: ClosedTrade) {
        debug_assert!(
            self.trades
                .last()
                .map_or(true, |last| last.exit_time <= trade.exit_time),
            "trades must be recorded in close order"
        );
        self.trades.push(trade);
    }

    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClosedTrade> {
        self.trades.iter()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn last(&self) -> Option<&ClosedTrade> {
        self.trades.last()
    }

    /// Export the ledger to CSV.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        writeln!(
            file,
            "direction,entry_time,exit_time,duration_hours,pnl,exit_reason,entry_spot,entry_futures,exit_spot,exit_futures,size,leverage,capital_after_close"
        )?;

        for trade in &self.trades {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{},{},{},{}",
                trade.direction,
                trade.entry_time.to_rfc3339(),
                trade.exit_time.to_rfc3339(),
                trade.duration_hours,
                trade.pnl,
                trade.exit_reason,
                trade.entry_spot_price,
                trade.entry_futures_price,
                trade.exit_spot_price,
                trade.exit_futures_price,
                trade.size,
                trade.leverage,
                trade.capital_after_close,
            )?;
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a TradeLedger {
    type Item = &'a ClosedTrade;
    type IntoIter = std::slice::Iter<'a, ClosedTrade>;

    fn into_iter(self) -> Self::IntoIter {
        self.trades.iter()
    }
}
