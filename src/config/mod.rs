//! Configuration management for the premium backtester.
//!
//! Loads settings from an optional config file and environment variables.

use crate::backtest::BacktestConfig;
use crate::strategy::StrategyConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Market data source
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Signal generation parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Simulation parameters
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Cache and export locations
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange symbol, e.g. BTCUSDT
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Kline interval
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Open time of the first candle to download
    #[serde(default = "default_since")]
    pub since: DateTime<Utc>,
    /// Number of candles per market
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_spot_base_url")]
    pub spot_base_url: String,
    #[serde(default = "default_futures_base_url")]
    pub futures_base_url: String,
    /// HTTP(S) proxy for all requests
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after an HTTP 429 before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base back-off when the server sends no Retry-After
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// SQLite candle cache
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    /// Directory for exported CSV/JSON files
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Write intermediate CSV files (candles, premium diagnostics)
    #[serde(default)]
    pub debug: bool,
}

// Default value functions
fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframe() -> String {
    "5m".to_string()
}

fn default_since() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn default_limit() -> usize {
    100_000
}

fn default_spot_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_futures_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_cache_path() -> String {
    "data/candles.db".to_string()
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Config {
    /// Load configuration from the environment and an optional config file.
    ///
    /// Without `path`, a `config.{toml,yaml,json}` in the working directory is
    /// used when present. Environment variables use the `PARB__` prefix, e.g.
    /// `PARB__BACKTEST__LEVERAGE=10`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("PARB")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.exchange.symbol.is_empty(), "symbol must not be empty");
        anyhow::ensure!(
            !self.exchange.timeframe.is_empty(),
            "timeframe must not be empty"
        );
        anyhow::ensure!(self.exchange.limit > 0, "limit must be positive");
        anyhow::ensure!(
            self.exchange.timeout_secs > 0,
            "timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.exchange.max_retries <= 10,
            "max_retries must be at most 10"
        );

        self.strategy.validate()?;
        self.backtest.validate()?;

        Ok(())
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            since: default_since(),
            limit: default_limit(),
            spot_base_url: default_spot_base_url(),
            futures_base_url: default_futures_base_url(),
            proxy_url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            output_dir: default_output_dir(),
            debug: false,
        }
    }
}
