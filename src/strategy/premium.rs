//! Z-score signal generation on the spot/futures premium.

use crate::backtest::{Bar, MarketSeries, Signal};
use crate::error::BacktestError;
use crate::exchange::Candle;
use crate::utils::{rolling_mean, rolling_std};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Signal generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Bars in the rolling z-score window
    #[serde(default = "default_zscore_window")]
    pub zscore_window: usize,
    /// |z| above which a signal fires
    #[serde(default = "default_zscore_threshold")]
    pub zscore_threshold: f64,
    /// Suppress signals while premium volatility is below this
    #[serde(default)]
    pub min_volatility: f64,
    /// Bars in the rolling volatility window
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
}

fn default_zscore_window() -> usize {
    6
}

fn default_zscore_threshold() -> f64 {
    1.8
}

fn default_volatility_window() -> usize {
    24
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            zscore_window: default_zscore_window(),
            zscore_threshold: default_zscore_threshold(),
            min_volatility: 0.0,
            volatility_window: default_volatility_window(),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.zscore_window >= 2,
            "zscore_window must be at least 2"
        );
        anyhow::ensure!(
            self.volatility_window >= 2,
            "volatility_window must be at least 2"
        );
        anyhow::ensure!(
            self.zscore_threshold.is_finite() && self.zscore_threshold >= 0.0,
            "zscore_threshold must be a non-negative number"
        );
        anyhow::ensure!(
            self.min_volatility.is_finite() && self.min_volatility >= 0.0,
            "min_volatility must be a non-negative number"
        );
        Ok(())
    }
}

/// Per-bar premium diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PremiumPoint {
    pub timestamp: DateTime<Utc>,
    pub spot: f64,
    pub futures: f64,
    /// spot - futures
    pub premium: f64,
    /// Premium as a percentage of spot
    pub premium_pct: f64,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub zscore: Option<f64>,
    /// Moving average over twice the z-score window
    pub sma: Option<f64>,
    pub volatility: Option<f64>,
    pub raw_signal: Signal,
    pub signal: Signal,
}

impl PremiumPoint {
    pub fn to_bar(&self) -> Bar {
        Bar::new(self.timestamp, self.spot, self.futures, self.signal)
    }
}

/// Turns spot and futures candles into a signalled bar series.
#[derive(Debug, Clone, Default)]
pub struct PremiumSignalGenerator {
    config: StrategyConfig,
}

impl PremiumSignalGenerator {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Compute diagnostics and signals for every bar present in both markets.
    #[instrument(skip_all, fields(spot = spot.len(), futures = futures.len()))]
    pub fn annotate(&self, spot: &[Candle], futures: &[Candle]) -> Vec<PremiumPoint> {
        let joined = join_closes(spot, futures);
        debug!(joined = joined.len(), "Joined spot and futures closes");

        let premium_pct: Vec<f64> = joined
            .iter()
            .map(|(_, s, f)| (s - f) / s * 100.0)
            .collect();

        let means = rolling_mean(&premium_pct, self.config.zscore_window);
        let stds = rolling_std(&premium_pct, self.config.zscore_window);
        let smas = rolling_mean(&premium_pct, self.config.zscore_window * 2);
        let vols = rolling_std(&premium_pct, self.config.volatility_window);

        let zscores: Vec<Option<f64>> = premium_pct
            .iter()
            .zip(means.iter().zip(&stds))
            .map(|(pct, (mean, std))| match (mean, std) {
                (Some(mean), Some(std)) if *std > 0.0 => Some((pct - mean) / std),
                _ => None,
            })
            .collect();

        let raw: Vec<Signal> = zscores.iter().map(|z| self.raw_signal(*z)).collect();

        let signals: Vec<Signal> = first_of_runs(&raw)
            .into_iter()
            .zip(&vols)
            .map(|(signal, vol)| match vol {
                Some(vol) if *vol < self.config.min_volatility => Signal::Flat,
                _ => signal,
            })
            .collect();

        joined
            .iter()
            .enumerate()
            .map(|(i, (timestamp, spot, futures))| PremiumPoint {
                timestamp: *timestamp,
                spot: *spot,
                futures: *futures,
                premium: spot - futures,
                premium_pct: premium_pct[i],
                mean: means[i],
                std: stds[i],
                zscore: zscores[i],
                sma: smas[i],
                volatility: vols[i],
                raw_signal: raw[i],
                signal: signals[i],
            })
            .collect()
    }

    /// Build the validated bar series the engine consumes.
    pub fn generate(
        &self,
        spot: &[Candle],
        futures: &[Candle],
    ) -> Result<MarketSeries, BacktestError> {
        let points = self.annotate(spot, futures);
        let series = MarketSeries::new(points.iter().map(PremiumPoint::to_bar).collect())?;

        info!(
            bars = series.len(),
            signals = series.signal_count(),
            "Generated premium signals"
        );
        Ok(series)
    }

    fn raw_signal(&self, zscore: Option<f64>) -> Signal {
        match zscore {
            Some(z) if z > self.config.zscore_threshold => Signal::Short,
            Some(z) if z < -self.config.zscore_threshold => Signal::Long,
            _ => Signal::Flat,
        }
    }
}

/// Inner join on open time, keeping close prices, ascending by time.
fn join_closes(spot: &[Candle], futures: &[Candle]) -> Vec<(DateTime<Utc>, f64, f64)> {
    let futures_close: HashMap<DateTime<Utc>, f64> =
        futures.iter().map(|c| (c.open_time, c.close)).collect();

    let mut joined: Vec<_> = spot
        .iter()
        .filter_map(|c| {
            futures_close
                .get(&c.open_time)
                .map(|f| (c.open_time, c.close, *f))
        })
        .collect();

    joined.sort_by_key(|(t, _, _)| *t);
    joined.dedup_by_key(|(t, _, _)| *t);
    joined
}

/// Keep a signal only on the first bar of a run of equal raw signals.
fn first_of_runs(raw: &[Signal]) -> Vec<Signal> {
    raw.iter()
        .enumerate()
        .map(|(i, signal)| {
            if i > 0 && raw[i - 1] == *signal {
                Signal::Flat
            } else {
                *signal
            }
        })
        .collect()
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Export premium diagnostics to CSV.
pub fn write_diagnostics<P: AsRef<Path>>(points: &[PremiumPoint], path: P) -> Result<()> {
    use std::io::Write;
    let path = path.as_ref();
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    writeln!(
        file,
        "timestamp,spot,futures,premium,premium_pct,mean,std,zscore,sma,volatility,raw_signal,signal"
    )?;

    for p in points {
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            p.timestamp.to_rfc3339(),
            p.spot,
            p.futures,
            p.premium,
            p.premium_pct,
            opt(p.mean),
            opt(p.std),
            opt(p.zscore),
            opt(p.sma),
            opt(p.volatility),
            p.raw_signal,
            p.signal,
        )?;
    }

    Ok(())
}
