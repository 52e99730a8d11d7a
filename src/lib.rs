//! # Premium Arb
//!
//! Backtester for a spot/futures premium mean-reversion strategy on Binance.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Binance klines client and the read-through candle cache
//! - `persistence`: SQLite candle store
//! - `strategy`: Premium z-score signal generation
//! - `backtest`: Position state machine, trade ledger and performance metrics
//! - `error`: Domain error types
//! - `utils`: Shared statistics helpers

pub mod backtest;
pub mod config;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::BacktestError;
