//! Performance metrics calculation for backtesting.
//!
//! Aggregates a finished trade ledger into return, drawdown and
//! risk-adjusted statistics. Values that are undefined for the given ledger
//! (no elapsed time, zero deviation, unrecovered drawdown) are `None`.

use crate::backtest::ledger::{hours_between, ClosedTrade, TradeLedger};
use crate::backtest::position::ExitReason;
use crate::utils::stats::{cumulative_sum, mean, running_max, sample_std};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const HOURS_PER_YEAR: f64 = 365.25 * 24.0;

/// Trade counts per exit reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitBreakdown {
    pub liquidated: usize,
    pub take_profit: usize,
    pub stop_loss: usize,
    pub reversal: usize,
}

impl ExitBreakdown {
    fn from_trades(trades: &[ClosedTrade]) -> Self {
        let mut breakdown = Self::default();
        for trade in trades {
            match trade.exit_reason {
                ExitReason::Liquidated => breakdown.liquidated += 1,
                ExitReason::TakeProfit => breakdown.take_profit += 1,
                ExitReason::StopLoss => breakdown.stop_loss += 1,
                ExitReason::Reversal => breakdown.reversal += 1,
            }
        }
        breakdown
    }

    /// Counts in exit priority order.
    pub fn iter(&self) -> impl Iterator<Item = (ExitReason, usize)> + '_ {
        ExitReason::ALL
            .into_iter()
            .map(move |reason| (reason, self.count(reason)))
    }

    pub fn count(&self, reason: ExitReason) -> usize {
        match reason {
            ExitReason::Liquidated => self.liquidated,
            ExitReason::TakeProfit => self.take_profit,
            ExitReason::StopLoss => self.stop_loss,
            ExitReason::Reversal => self.reversal,
        }
    }
}

/// Statistics over a non-empty ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    pub initial_capital: f64,
    /// Capital after the last closed trade
    pub final_capital: f64,
    pub total_profit: f64,
    /// Total return as percentage
    pub total_return_pct: f64,
    /// Compound annualized return percentage
    pub annualized_return: Option<f64>,

    // Activity
    pub total_trades: usize,
    pub winning_trades: usize,
    /// Winning trades / total, as percentage
    pub win_rate: f64,
    pub avg_duration_hours: f64,
    pub exits: ExitBreakdown,

    // Risk
    /// Worst peak-to-trough decline of closed-trade capital, as a (negative) percentage
    pub max_drawdown: f64,
    /// Hours from the cumulative-pnl trough back to its prior peak
    pub max_drawdown_recovery_hours: Option<f64>,
    /// mean(pnl) / std(pnl), on percentage pnl
    pub sharpe_ratio: Option<f64>,

    // Time
    pub duration_days: f64,
}

/// Outcome of aggregating a ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "metrics", rename_all = "snake_case")]
pub enum MetricsReport {
    /// The run closed no trades.
    NoTrades,
    Summary(BacktestMetrics),
}

impl MetricsReport {
    /// Aggregate a finished ledger.
    ///
    /// `span` is the first and last timestamp of the simulated series.
    pub fn calculate(
        ledger: &TradeLedger,
        initial_capital: f64,
        span: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Self {
        let trades = ledger.trades();
        let Some(last) = trades.last() else {
            return MetricsReport::NoTrades;
        };

        let final_capital = last.capital_after_close;
        let total_profit = final_capital - initial_capital;
        let total_return_pct = total_profit / initial_capital * 100.0;

        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.is_win()).count();
        let win_rate = winning_trades as f64 / total_trades as f64 * 100.0;

        let durations: Vec<f64> = trades.iter().map(|t| t.duration_hours).collect();
        let avg_duration_hours = mean(&durations).unwrap_or(0.0);

        let span_hours = span.map_or(0.0, |(start, end)| hours_between(start, end));
        let annualized_return =
            annualized_return(initial_capital, final_capital, span_hours / HOURS_PER_YEAR);

        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();

        MetricsReport::Summary(BacktestMetrics {
            initial_capital,
            final_capital,
            total_profit,
            total_return_pct,
            annualized_return,
            total_trades,
            winning_trades,
            win_rate,
            avg_duration_hours,
            exits: ExitBreakdown::from_trades(trades),
            max_drawdown: max_drawdown_pct(trades, initial_capital),
            max_drawdown_recovery_hours: drawdown_recovery_hours(trades),
            sharpe_ratio: sharpe_ratio(&pnls),
            duration_days: span_hours / 24.0,
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, MetricsReport::NoTrades)
    }

    pub fn metrics(&self) -> Option<&BacktestMetrics> {
        match self {
            MetricsReport::NoTrades => None,
            MetricsReport::Summary(metrics) => Some(metrics),
        }
    }

    /// Flatten into named values; empty when no trades were executed.
    pub fn entries(&self) -> BTreeMap<&'static str, Option<f64>> {
        let mut map = BTreeMap::new();
        let Some(m) = self.metrics() else {
            return map;
        };

        map.insert("initial_capital", Some(m.initial_capital));
        map.insert("final_capital", Some(m.final_capital));
        map.insert("total_profit", Some(m.total_profit));
        map.insert("total_return_pct", Some(m.total_return_pct));
        map.insert("annualized_return_pct", m.annualized_return);
        map.insert("total_trades", Some(m.total_trades as f64));
        map.insert("win_rate_pct", Some(m.win_rate));
        map.insert("avg_duration_hours", Some(m.avg_duration_hours));
        map.insert("max_drawdown_pct", Some(m.max_drawdown));
        map.insert("max_drawdown_recovery_hours", m.max_drawdown_recovery_hours);
        map.insert("sharpe_ratio", m.sharpe_ratio);
        map
    }

    /// Format the report as a summary string.
    pub fn summary(&self) -> String {
        match self {
            MetricsReport::NoTrades => "No trades executed.".to_string(),
            MetricsReport::Summary(m) => m.summary(),
        }
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl BacktestMetrics {
    /// Format metrics as a summary string.
    pub fn summary(&self) -> String {
        let exits = self
            .exits
            .iter()
            .map(|(reason, count)| format!("{} {}", reason, count))
            .collect::<Vec<_>>()
            .join(" / ");

        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({:.1} days)
═══════════════════════════════════════════════
RETURNS
  Initial Capital:   ${:.2}
  Final Capital:     ${:.2}
  Total Profit:      ${:.2} ({:.2}%)
  Annualized:        {}

RISK
  Max Drawdown:      {:.2}%
  DD Recovery:       {}
  Sharpe Ratio:      {}

ACTIVITY
  Total Trades:      {}
  Win Rate:          {:.1}%
  Avg Duration:      {:.2} h
  Exits:             {}
═══════════════════════════════════════════════"#,
            self.duration_days,
            self.initial_capital,
            self.final_capital,
            self.total_profit,
            self.total_return_pct,
            fmt_optional(self.annualized_return, "%"),
            self.max_drawdown,
            fmt_optional(self.max_drawdown_recovery_hours, " h"),
            fmt_optional(self.sharpe_ratio, ""),
            self.total_trades,
            self.win_rate,
            self.avg_duration_hours,
            exits,
        )
    }
}

fn fmt_optional(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.3}{}", v, unit),
        None => "n/a".to_string(),
    }
}

/// Compound annualized return percentage.
///
/// Undefined without elapsed time or once the capital is wiped out.
fn annualized_return(initial: f64, final_capital: f64, years: f64) -> Option<f64> {
    let growth = final_capital / initial;
    if years <= 0.0 || growth.is_nan() || growth <= 0.0 {
        return None;
    }
    Some((growth.powf(1.0 / years) - 1.0) * 100.0).filter(|v| v.is_finite())
}

/// Maximum drawdown of the closed-trade capital curve, in percent (≤ 0).
///
/// The running peak starts at the initial capital.
fn max_drawdown_pct(trades: &[ClosedTrade], initial_capital: f64) -> f64 {
    let mut peak = initial_capital;
    let mut max_dd: f64 = 0.0;

    for trade in trades {
        let capital = trade.capital_after_close;
        if capital > peak {
            peak = capital;
        } else {
            max_dd = max_dd.min(capital / peak - 1.0);
        }
    }

    max_dd * 100.0
}

/// Hours needed for cumulative pnl to climb back from its deepest trough.
///
/// `Some(0.0)` when the ledger never draws down, `None` when the trough is
/// never recovered.
fn drawdown_recovery_hours(trades: &[ClosedTrade]) -> Option<f64> {
    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
    let cumulative = cumulative_sum(&pnls);
    let peaks = running_max(&cumulative);

    // First index of the deepest drawdown.
    let mut trough = 0;
    let mut deepest = 0.0;
    for (i, (cum, peak)) in cumulative.iter().zip(&peaks).enumerate() {
        let drawdown = cum - peak;
        if drawdown < deepest {
            deepest = drawdown;
            trough = i;
        }
    }

    let peak_value = *peaks.get(trough)?;
    let trough_time = trades[trough].exit_time;

    cumulative[trough..]
        .iter()
        .position(|&cum| cum >= peak_value)
        .map(|offset| hours_between(trough_time, trades[trough + offset].exit_time))
}

/// Mean over sample deviation of percentage pnl.
fn sharpe_ratio(pnls: &[f64]) -> Option<f64> {
    let pct: Vec<f64> = pnls.iter().map(|p| p * 100.0).collect();
    let avg = mean(&pct)?;
    let std = sample_std(&pct)?;

    if std == 0.0 {
        return None;
    }
    Some(avg / std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::position::Direction;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Build a ledger from (exit hour, pnl, capital after close).
    fn ledger(rows: &[(i64, f64, f64)]) -> TradeLedger {
        let mut ledger = TradeLedger::new();
        let mut entry = t0();
        for &(exit_hour, pnl, capital) in rows {
            let exit = t0() + Duration::hours(exit_hour);
            ledger.record(ClosedTrade {
                direction: Direction::Long,
                entry_time: entry,
                exit_time: exit,
                duration_hours: hours_between(entry, exit),
                pnl,
                exit_reason: if pnl > 0.0 {
                    ExitReason::TakeProfit
                } else {
                    ExitReason::StopLoss
                },
                entry_spot_price: 100.0,
                entry_futures_price: 100.0,
                exit_spot_price: 100.0,
                exit_futures_price: 100.0,
                size: 1000.0,
                leverage: 1.0,
                capital_at_entry: 10000.0,
                capital_after_close: capital,
            });
            entry = exit;
        }
        ledger
    }

    fn span(hours: i64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((t0(), t0() + Duration::hours(hours)))
    }

    #[test]
    fn test_empty_ledger_reports_no_trades() {
        let report = MetricsReport::calculate(&TradeLedger::new(), 10000.0, span(10));
        assert!(report.is_empty());
        assert!(report.entries().is_empty());
        assert_eq!(report.summary(), "No trades executed.");
    }

    #[test]
    fn test_basic_statistics() {
        let ledger = ledger(&[(2, 0.03, 10030.0), (4, -0.01, 10020.0), (8, 0.02, 10040.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(24));
        let m = report.metrics().unwrap();

        assert_eq!(m.total_trades, 3);
        assert_eq!(m.winning_trades, 2);
        assert!((m.win_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((m.total_profit - 40.0).abs() < 1e-9);
        assert!((m.total_return_pct - 0.4).abs() < 1e-9);
        // Durations 2h, 2h, 4h.
        assert!((m.avg_duration_hours - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.exits.take_profit, 2);
        assert_eq!(m.exits.stop_loss, 1);
        assert_eq!(m.duration_days, 1.0);
    }

    #[test]
    fn test_annualized_return() {
        // One full year of 10% growth.
        let year_hours = (365.25 * 24.0) as i64;
        let ledger = ledger(&[(5, 0.1, 11000.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(year_hours));
        let annualized = report.metrics().unwrap().annualized_return.unwrap();
        assert!((annualized - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_annualized_return_undefined_without_elapsed_time() {
        let ledger = ledger(&[(0, 0.1, 11000.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(0));
        assert_eq!(report.metrics().unwrap().annualized_return, None);

        let report = MetricsReport::calculate(&ledger, 10000.0, None);
        assert_eq!(report.metrics().unwrap().annualized_return, None);
    }

    #[test]
    fn test_annualized_return_undefined_after_wipeout() {
        assert_eq!(annualized_return(10000.0, -5000.0, 1.0), None);
        assert_eq!(annualized_return(10000.0, 0.0, 0.5), None);
        assert_eq!(annualized_return(10000.0, f64::NAN, 1.0), None);

        let ledger = ledger(&[(1, -1.5, -5000.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(48));
        let m = report.metrics().unwrap();
        assert_eq!(m.annualized_return, None);
        assert!((m.total_return_pct + 150.0).abs() < 1e-9);

        let summary = report.summary();
        assert!(summary.contains("Annualized:        n/a"));
        assert!(!summary.contains("NaN"));
    }

    #[test]
    fn test_max_drawdown_from_capital_curve() {
        let ledger = ledger(&[(1, 0.05, 10500.0), (2, -0.1, 9450.0), (3, 0.2, 11340.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(3));
        let m = report.metrics().unwrap();

        // 10500 -> 9450 is a 10% decline.
        assert!((m.max_drawdown + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_drawdown_seeded_with_initial_capital() {
        let ledger = ledger(&[(1, -0.04, 9600.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(1));
        assert!((report.metrics().unwrap().max_drawdown + 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_drawdown_when_always_rising() {
        let ledger = ledger(&[(1, 0.01, 10100.0), (2, 0.01, 10200.0)]);
        let m = MetricsReport::calculate(&ledger, 10000.0, span(2));
        let m = m.metrics().unwrap();
        assert_eq!(m.max_drawdown, 0.0);
        assert_eq!(m.max_drawdown_recovery_hours, Some(0.0));
    }

    #[test]
    fn test_recovery_time_single_trade_is_zero() {
        let ledger = ledger(&[(3, 0.02, 10020.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(3));
        assert_eq!(report.metrics().unwrap().max_drawdown_recovery_hours, Some(0.0));
    }

    #[test]
    fn test_recovery_time_found() {
        // Cumulative pnl: 0.05, 0.02, -0.01, 0.03, 0.08
        // Trough at index 2 (exit hour 6), peak 0.05 regained at index 4 (hour 20).
        let ledger = ledger(&[
            (2, 0.05, 10050.0),
            (4, -0.03, 10020.0),
            (6, -0.03, 9990.0),
            (10, 0.04, 10030.0),
            (20, 0.05, 10080.0),
        ]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(24));
        let recovery = report.metrics().unwrap().max_drawdown_recovery_hours.unwrap();
        assert!((recovery - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_recovery_time_unrecovered_is_undefined() {
        let ledger = ledger(&[(2, 0.05, 10050.0), (4, -0.03, 10020.0), (6, 0.01, 10030.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(6));
        assert_eq!(report.metrics().unwrap().max_drawdown_recovery_hours, None);
    }

    #[test]
    fn test_sharpe_ratio() {
        let ledger = ledger(&[(1, 0.02, 10020.0), (2, 0.04, 10060.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(2));
        let sharpe = report.metrics().unwrap().sharpe_ratio.unwrap();

        // mean 3%, sample std sqrt(2)%.
        assert!((sharpe - 3.0 / 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_sharpe_undefined_cases() {
        let single = ledger(&[(1, 0.02, 10020.0)]);
        let report = MetricsReport::calculate(&single, 10000.0, span(1));
        assert_eq!(report.metrics().unwrap().sharpe_ratio, None);

        let flat = ledger(&[(1, 0.02, 10020.0), (2, 0.02, 10040.0)]);
        let report = MetricsReport::calculate(&flat, 10000.0, span(2));
        assert_eq!(report.metrics().unwrap().sharpe_ratio, None);
    }

    #[test]
    fn test_calculation_is_deterministic() {
        let ledger = ledger(&[(1, 0.03, 10030.0), (5, -0.02, 10010.0), (9, 0.01, 10020.0)]);
        let first = MetricsReport::calculate(&ledger, 10000.0, span(12));
        let second = MetricsReport::calculate(&ledger, 10000.0, span(12));

        let a = first.entries();
        let b = second.entries();
        assert_eq!(a.len(), b.len());
        for (key, value) in &a {
            let other = b[key];
            assert_eq!(value.map(f64::to_bits), other.map(f64::to_bits), "{}", key);
        }
    }

    #[test]
    fn test_entries_and_summary() {
        let ledger = ledger(&[(1, 0.02, 10020.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(0));
        let entries = report.entries();

        assert_eq!(entries["total_trades"], Some(1.0));
        assert_eq!(entries["annualized_return_pct"], None);
        assert_eq!(entries["sharpe_ratio"], None);

        let summary = report.summary();
        assert!(summary.contains("BACKTEST RESULTS"));
        assert!(summary.contains("n/a"));
        assert!(summary.contains("liquidated 0 / take_profit 1 / stop_loss 0 / reversal 0"));
    }

    #[test]
    fn test_exit_breakdown_iterates_in_priority_order() {
        let ledger = ledger(&[(1, 0.02, 10020.0), (2, -0.03, 9990.0), (3, 0.02, 10010.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(3));
        let counts: Vec<_> = report.metrics().unwrap().exits.iter().collect();

        assert_eq!(
            counts,
            vec![
                (ExitReason::Liquidated, 0),
                (ExitReason::TakeProfit, 2),
                (ExitReason::StopLoss, 1),
                (ExitReason::Reversal, 0),
            ]
        );
    }

    #[test]
    fn test_report_serializes_undefined_as_null() {
        let ledger = ledger(&[(1, 0.02, 10020.0)]);
        let report = MetricsReport::calculate(&ledger, 10000.0, span(0));
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "summary");
        assert!(json["metrics"]["sharpe_ratio"].is_null());

        let empty = serde_json::to_value(MetricsReport::NoTrades).unwrap();
        assert_eq!(empty["status"], "no_trades");
    }
}
