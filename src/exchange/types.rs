//! Type definitions for Binance kline data.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Market a candle series comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Spot,
    /// USDT-margined perpetual futures
    Futures,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::Futures => "futures",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Parse one row of a Binance klines response.
    ///
    /// Rows are arrays: `[openTime, "open", "high", "low", "close", "volume", ...]`.
    pub fn from_kline(row: &[Value]) -> Result<Self> {
        if row.len() < 6 {
            bail!("Kline row has {} fields, expected at least 6", row.len());
        }

        let open_ms = row[0]
            .as_i64()
            .ok_or_else(|| anyhow!("Kline open time is not an integer: {}", row[0]))?;
        let open_time = DateTime::from_timestamp_millis(open_ms)
            .ok_or_else(|| anyhow!("Kline open time out of range: {open_ms}"))?;

        Ok(Self {
            open_time,
            open: price_field(&row[1], "open")?,
            high: price_field(&row[2], "high")?,
            low: price_field(&row[3], "low")?,
            close: price_field(&row[4], "close")?,
            volume: price_field(&row[5], "volume")?,
        })
    }
}

/// Binance encodes decimals as strings; accept plain numbers too.
fn price_field(value: &Value, name: &str) -> Result<f64> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("Invalid kline {name}: {s}")),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow!("Invalid kline {name}: {n}")),
        other => bail!("Invalid kline {name}: {other}"),
    }
}

/// A paginated candle download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandleRequest {
    pub market: Market,
    /// Exchange symbol, e.g. `BTCUSDT`
    pub symbol: String,
    /// Kline interval, e.g. `5m`
    pub interval: String,
    /// Open time of the first candle wanted
    pub since: DateTime<Utc>,
    /// Maximum number of candles
    pub limit: usize,
}

impl CandleRequest {
    pub fn new(
        market: Market,
        symbol: impl Into<String>,
        interval: impl Into<String>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Self {
        Self {
            market,
            symbol: symbol.into(),
            interval: interval.into(),
            since,
            limit,
        }
    }

    /// The same request against another market.
    pub fn for_market(&self, market: Market) -> Self {
        Self {
            market,
            ..self.clone()
        }
    }
}

impl fmt::Display for CandleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} since {} (limit {})",
            self.market,
            self.symbol,
            self.interval,
            self.since.to_rfc3339(),
            self.limit
        )
    }
}
