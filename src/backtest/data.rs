//! Market series consumed by the simulation.
//!
//! Provides the bar type, the validated series wrapper and CSV import/export.

use crate::error::BacktestError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Discrete trade signal attached to a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Signal {
    /// Long premium: long spot, short futures.
    Long,
    /// Short premium: short spot, long futures.
    Short,
    /// No signal.
    Flat,
}

impl Signal {
    /// Numeric value of the signal (+1, -1 or 0).
    pub fn value(self) -> i64 {
        match self {
            Signal::Long => 1,
            Signal::Short => -1,
            Signal::Flat => 0,
        }
    }

    pub fn is_flat(self) -> bool {
        self == Signal::Flat
    }
}

impl TryFrom<i64> for Signal {
    type Error = BacktestError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Signal::Long),
            -1 => Ok(Signal::Short),
            0 => Ok(Signal::Flat),
            other => Err(BacktestError::InvalidSignal(other)),
        }
    }
}

impl From<Signal> for i64 {
    fn from(signal: Signal) -> Self {
        signal.value()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// One time bar of the market series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub spot_price: f64,
    pub futures_price: f64,
    pub signal: Signal,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        spot_price: f64,
        futures_price: f64,
        signal: Signal,
    ) -> Self {
        Self {
            timestamp,
            spot_price,
            futures_price,
            signal,
        }
    }
}

/// An ordered series of bars with strictly increasing timestamps.
///
/// Immutable once built, so several engines may borrow the same series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketSeries {
    bars: Vec<Bar>,
}

impl MarketSeries {
    /// Build a series, checking ordering and price invariants.
    pub fn new(bars: Vec<Bar>) -> Result<Self, BacktestError> {
        for (index, bar) in bars.iter().enumerate() {
            if !(bar.spot_price.is_finite() && bar.spot_price > 0.0) {
                return Err(BacktestError::series(
                    index,
                    format!("spot price must be positive, got {}", bar.spot_price),
                ));
            }
            if !(bar.futures_price.is_finite() && bar.futures_price > 0.0) {
                return Err(BacktestError::series(
                    index,
                    format!("futures price must be positive, got {}", bar.futures_price),
                ));
            }
            if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
                return Err(BacktestError::series(
                    index,
                    format!(
                        "timestamp {} does not follow {}",
                        bar.timestamp.to_rfc3339(),
                        bars[index - 1].timestamp.to_rfc3339()
                    ),
                ));
            }
        }

        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// First and last timestamps, if the series has any bars.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.bars.first(), self.bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Number of bars carrying a non-flat signal.
    pub fn signal_count(&self) -> usize {
        self.bars.iter().filter(|b| !b.signal.is_flat()).count()
    }

    /// Restrict the series to bars within `[start, end]`.
    pub fn window(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        let bars = self
            .bars
            .iter()
            .filter(|b| start.map_or(true, |s| b.timestamp >= s))
            .filter(|b| end.map_or(true, |e| b.timestamp <= e))
            .cloned()
            .collect();

        // A subsequence of an ordered series is still ordered.
        Self { bars }
    }

    /// Export the series as `timestamp,spot,futures,signal` CSV.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        writeln!(file, "timestamp,spot,futures,signal")?;

        for bar in &self.bars {
            writeln!(
                file,
                "{},{},{},{}",
                bar.timestamp.to_rfc3339(),
                bar.spot_price,
                bar.futures_price,
                bar.signal,
            )?;
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a MarketSeries {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}

/// Trait for loading a prepared market series.
pub trait DataLoader: Send + Sync {
    /// Load the bars within the given (inclusive) time range.
    fn load_series(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<MarketSeries>;

    /// Get the available date range in the data.
    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)>;
}

/// CSV loader for annotated bar series.
///
/// Expected CSV format:
/// ```csv
/// timestamp,spot,futures,signal
/// 2024-01-01T00:00:00Z,42000.5,42010.0,0
/// 2024-01-01T00:05:00Z,42003.1,41990.2,1
/// ```
#[derive(Debug, Clone)]
pub struct CsvBarLoader {
    series: MarketSeries,
}

impl CsvBarLoader {
    /// Load bars from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    /// Load bars from CSV content string.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut bars = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            // Skip header
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let bar = parse_bar(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            bars.push(bar);
        }

        let series = MarketSeries::new(bars).context("CSV rows do not form a valid series")?;
        Ok(Self { series })
    }

    /// Create a loader from an in-memory series.
    pub fn from_series(series: MarketSeries) -> Self {
        Self { series }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl DataLoader for CsvBarLoader {
    fn load_series(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<MarketSeries> {
        Ok(self.series.window(start, end))
    }

    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.series.span()
    }
}

fn parse_bar(line: &str) -> Result<Bar> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 4 {
        anyhow::bail!(
            "Expected 4 columns (timestamp,spot,futures,signal), got {}",
            parts.len()
        );
    }

    let signal: i64 = parts[3]
        .trim()
        .parse()
        .with_context(|| format!("Invalid signal: {}", parts[3]))?;

    Ok(Bar {
        timestamp: parts[0]
            .trim()
            .parse()
            .with_context(|| format!("Invalid timestamp: {}", parts[0]))?,
        spot_price: parts[1]
            .trim()
            .parse()
            .with_context(|| format!("Invalid spot price: {}", parts[1]))?,
        futures_price: parts[2]
            .trim()
            .parse()
            .with_context(|| format!("Invalid futures price: {}", parts[2]))?,
        signal: Signal::try_from(signal)?,
    })
}
