//! Backtesting simulation engine.
//!
//! Replays a market series bar by bar through the position state machine.

use crate::backtest::data::{Bar, MarketSeries};
use crate::backtest::ledger::{ClosedTrade, TradeLedger};
use crate::backtest::metrics::MetricsReport;
use crate::backtest::position::{CostModel, Direction, ExitReason, OpenPosition};
use crate::backtest::{BacktestConfig, ReentryPolicy};
use crate::error::BacktestError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What happened on a single bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Nothing changed.
    Idle,
    /// The open position was kept.
    Held,
    Opened(Direction),
    Closed(ExitReason),
    /// A position closed and a new one opened on the same bar.
    Rolled(ExitReason, Direction),
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub config: BacktestConfig,
    pub ledger: TradeLedger,
    pub report: MetricsReport,
    /// Free capital at the end of the series
    pub final_capital: f64,
    /// Position still open when the series ended, if any
    pub open_position: Option<OpenPosition>,
    pub bars_processed: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BacktestResult {
    /// Get a summary string.
    pub fn summary(&self) -> String {
        let period = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => format!(
                "{} to {}",
                start.format("%Y-%m-%d %H:%M"),
                end.format("%Y-%m-%d %H:%M")
            ),
            _ => "n/a".to_string(),
        };

        let open = match &self.open_position {
            Some(position) => format!(
                "{} since {} (${:.2})",
                position.direction,
                position.entry_time.format("%Y-%m-%d %H:%M"),
                position.size
            ),
            None => "none".to_string(),
        };

        format!(
            "{}\n\nBacktest Period: {}\nBars: {}\nOpen Position: {}",
            self.report.summary(),
            period,
            self.bars_processed,
            open,
        )
    }
}

/// The backtesting simulation engine.
///
/// Owns the capital, the single position slot and the ledger of one run.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
    costs: CostModel,
    capital: f64,
    position: Option<OpenPosition>,
    ledger: TradeLedger,
}

impl BacktestEngine {
    /// Create a new engine, rejecting invalid configuration up front.
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        config.validate()?;

        Ok(Self {
            costs: CostModel::from_config(&config),
            capital: config.initial_capital,
            position: None,
            ledger: TradeLedger::new(),
            config,
        })
    }

    /// Run the simulation over the whole series.
    ///
    /// The engine is reset first, so one engine can run several series.
    pub fn run(&mut self, series: &MarketSeries) -> BacktestResult {
        self.reset();

        info!(
            bars = series.len(),
            signals = series.signal_count(),
            initial_capital = self.config.initial_capital,
            leverage = self.config.leverage,
            "Starting backtest"
        );

        for (i, bar) in series.iter().enumerate() {
            self.step(bar);

            if i > 0 && i % 10_000 == 0 {
                debug!(
                    "Progress: {}/{} ({:.1}%), Capital: ${:.2}",
                    i,
                    series.len(),
                    (i as f64 / series.len() as f64) * 100.0,
                    self.capital
                );
            }
        }

        let span = series.span();
        let report = MetricsReport::calculate(&self.ledger, self.config.initial_capital, span);

        info!(
            trades = self.ledger.len(),
            final_capital = self.capital,
            still_open = self.position.is_some(),
            "Backtest complete"
        );

        BacktestResult {
            config: self.config.clone(),
            ledger: self.ledger.clone(),
            report,
            final_capital: self.capital,
            open_position: self.position.clone(),
            bars_processed: series.len(),
            start_time: span.map(|(start, _)| start),
            end_time: span.map(|(_, end)| end),
        }
    }

    /// Process a single bar.
    pub fn step(&mut self, bar: &Bar) -> StepEvent {
        let Some(position) = self.position.take() else {
            return match self.try_open(bar) {
                Some(direction) => StepEvent::Opened(direction),
                None => StepEvent::Idle,
            };
        };

        let pnl = position.pnl_at(bar, self.costs);
        let exit = position.exit_reason(
            pnl,
            bar.signal,
            self.config.take_profit,
            self.config.stop_loss,
        );

        let Some(reason) = exit else {
            self.position = Some(position);
            return StepEvent::Held;
        };

        self.close(&position, bar, pnl, reason);

        match self.config.reentry {
            ReentryPolicy::NextBar => StepEvent::Closed(reason),
            ReentryPolicy::SameBar => match self.try_open(bar) {
                Some(direction) => StepEvent::Rolled(reason, direction),
                None => StepEvent::Closed(reason),
            },
        }
    }

    fn try_open(&mut self, bar: &Bar) -> Option<Direction> {
        let direction = Direction::from_signal(bar.signal)?;
        if self.capital <= 0.0 {
            warn!(
                time = %bar.timestamp,
                %direction,
                capital = self.capital,
                "No free capital, skipping entry"
            );
            return None;
        }

        let size = self.capital * self.config.position_ratio;
        let position =
            OpenPosition::open(direction, bar, size, self.config.leverage, self.capital);

        self.capital -= size;

        debug!(
            time = %bar.timestamp,
            %direction,
            spot = bar.spot_price,
            futures = bar.futures_price,
            size,
            capital = self.capital,
            "Opened position"
        );

        self.position = Some(position);
        Some(direction)
    }

    fn close(&mut self, position: &OpenPosition, bar: &Bar, pnl: f64, reason: ExitReason) {
        self.capital += (1.0 + pnl) * position.size;

        let trade = ClosedTrade::settle(
            position,
            bar.timestamp,
            bar.spot_price,
            bar.futures_price,
            pnl,
            reason,
            self.capital,
        );

        debug!(
            time = %bar.timestamp,
            direction = %position.direction,
            %reason,
            pnl_pct = pnl * 100.0,
            duration_hours = trade.duration_hours,
            capital = self.capital,
            "Closed position"
        );

        self.ledger.record(trade);
    }

    fn reset(&mut self) {
        self.capital = self.config.initial_capital;
        self.position = None;
        self.ledger = TradeLedger::new();
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Free capital (excludes the allocation of an open position).
    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }
}
