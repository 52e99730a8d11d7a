//! Premium Arb - Main Entry Point
//!
//! Downloads Binance spot and futures klines, derives premium signals and
//! backtests the mean-reversion strategy.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use premium_arb::backtest::{BacktestEngine, CsvBarLoader, DataLoader, MarketSeries};
use premium_arb::config::Config;
use premium_arb::exchange::{fetch_cached, BinanceClient, Candle, CandleRequest, Market};
use premium_arb::persistence::CandleStore;
use premium_arb::strategy::{write_diagnostics, PremiumSignalGenerator};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Premium Arb CLI
#[derive(Parser)]
#[command(name = "premium-arb")]
#[command(version, about = "Spot/futures premium mean-reversion backtester for Binance")]
struct Cli {
    /// Path to a config file (defaults to ./config.* when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the exchange symbol (e.g. BTCUSDT)
    #[arg(long, global = true)]
    symbol: Option<String>,

    /// Override the kline interval (e.g. 5m)
    #[arg(long, global = true)]
    timeframe: Option<String>,

    /// Override the initial capital
    #[arg(long, global = true)]
    initial_capital: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download spot and futures candles into the cache
    Fetch,

    /// Generate premium signals and write the bar series
    Signals {
        /// Output CSV path
        #[arg(short, long)]
        output: String,
    },

    /// Run a backtest simulation
    Backtest {
        /// Bar CSV (timestamp,spot,futures,signal); built from cached candles if omitted
        #[arg(short, long)]
        data: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<String>,

        /// Output directory for trades.csv and metrics.json
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logging()?;

    let config = load_config(&cli)?;
    log_config(&config);

    match cli.command {
        Commands::Fetch => run_fetch(&config).await,
        Commands::Signals { output } => run_signals(&config, &output).await,
        Commands::Backtest {
            data,
            start,
            end,
            output,
        } => {
            run_backtest(
                &config,
                data.as_deref(),
                start.as_deref(),
                end.as_deref(),
                output.as_deref(),
            )
            .await
        }
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "premium-arb.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("premium_arb=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Load configuration and apply command line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(symbol) = &cli.symbol {
        config.exchange.symbol = symbol.clone();
    }
    if let Some(timeframe) = &cli.timeframe {
        config.exchange.timeframe = timeframe.clone();
    }
    if let Some(capital) = cli.initial_capital {
        config.backtest.initial_capital = capital;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!(
        "   Market: {} {} since {} (limit {})",
        config.exchange.symbol,
        config.exchange.timeframe,
        config.exchange.since.format("%Y-%m-%d %H:%M"),
        config.exchange.limit
    );
    info!(
        "   Z-Score: window {} threshold {} (min volatility {})",
        config.strategy.zscore_window,
        config.strategy.zscore_threshold,
        config.strategy.min_volatility
    );
    info!(
        "   Capital: ${:.2} ({:.0}% per position, {}x futures leverage)",
        config.backtest.initial_capital,
        config.backtest.position_ratio * 100.0,
        config.backtest.leverage
    );
    info!(
        "   Exits: take profit {:.3}% / stop loss {:.3}%",
        config.backtest.take_profit * 100.0,
        config.backtest.stop_loss * 100.0
    );
    info!(
        "   Costs: fees {} / slippage {}",
        if config.backtest.enable_fee { "on" } else { "off" },
        if config.backtest.enable_slippage { "on" } else { "off" }
    );
}

/// Spot and futures requests for the configured market.
fn candle_requests(config: &Config) -> (CandleRequest, CandleRequest) {
    let spot = CandleRequest::new(
        Market::Spot,
        config.exchange.symbol.clone(),
        config.exchange.timeframe.clone(),
        config.exchange.since,
        config.exchange.limit,
    );
    let futures = spot.for_market(Market::Futures);
    (spot, futures)
}

/// Load both markets, downloading whatever the cache lacks.
async fn load_candles(config: &Config) -> Result<(Vec<Candle>, Vec<Candle>)> {
    let store = CandleStore::new(&config.output.cache_path)?;
    let client = BinanceClient::new(&config.exchange)?;
    let (spot_request, futures_request) = candle_requests(config);

    info!("📥 Loading spot candles...");
    let spot = fetch_cached(&client, &store, &spot_request).await?;
    info!("📥 Loading futures candles...");
    let futures = fetch_cached(&client, &store, &futures_request).await?;

    if spot.is_empty() || futures.is_empty() {
        warn!(
            spot = spot.len(),
            futures = futures.len(),
            "No candles returned for one of the markets"
        );
    }

    Ok((spot, futures))
}

/// Build the signalled bar series from cached candles.
async fn build_series(config: &Config) -> Result<MarketSeries> {
    let (spot, futures) = load_candles(config).await?;
    let generator = PremiumSignalGenerator::new(config.strategy.clone());
    let points = generator.annotate(&spot, &futures);

    if config.output.debug {
        let dir = Path::new(&config.output.output_dir).join("debug");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join("premium.csv");
        write_diagnostics(&points, &path)?;
        info!("🐛 Premium diagnostics saved to: {}", path.display());
    }

    let series = generator.generate(&spot, &futures)?;
    Ok(series)
}

/// Download candles for both markets.
async fn run_fetch(config: &Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              FETCH MODE                                    ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let (spot, futures) = load_candles(config).await?;

    info!("✅ Spot candles: {}", spot.len());
    info!("✅ Futures candles: {}", futures.len());
    if let (Some(first), Some(last)) = (spot.first(), spot.last()) {
        info!(
            "   Spot range: {} to {}",
            first.open_time.format("%Y-%m-%d %H:%M"),
            last.open_time.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Generate signals and write the bar series.
async fn run_signals(config: &Config, output: &str) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              SIGNAL MODE                                   ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let series = build_series(config).await?;

    if let Some(parent) = Path::new(output).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    series.to_csv(output)?;

    info!(
        "📁 {} bars ({} signals) saved to: {}",
        series.len(),
        series.signal_count(),
        output
    );
    Ok(())
}

/// Parse a `YYYY-MM-DD` date as the start or end of that day in UTC.
fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}", value, e))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .with_context(|| format!("Invalid date '{}'", value))
}

/// Run a backtest and report the results.
async fn run_backtest(
    config: &Config,
    data_path: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let start = start.map(|s| parse_date(s, false)).transpose()?;
    let end = end.map(|s| parse_date(s, true)).transpose()?;

    let loader = match data_path {
        Some(path) => {
            info!("📊 Loading bars from: {}", path);
            CsvBarLoader::new(path)?
        }
        None => CsvBarLoader::from_series(build_series(config).await?),
    };

    if let Some((data_start, data_end)) = loader.available_range() {
        info!(
            "   Data range: {} to {}",
            data_start.format("%Y-%m-%d %H:%M"),
            data_end.format("%Y-%m-%d %H:%M")
        );
    }

    let series = loader.load_series(start, end)?;
    info!("   Bars: {} ({} signals)", series.len(), series.signal_count());

    let mut engine = BacktestEngine::new(config.backtest.clone())?;
    let result = engine.run(&series);

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir)?;

        let trades_path = dir.join("trades.csv");
        result.ledger.to_csv(&trades_path)?;
        info!("📁 Trades saved to: {}", trades_path.display());

        let metrics_path = dir.join("metrics.json");
        let json = serde_json::to_string_pretty(&result.report)
            .context("Failed to serialize metrics")?;
        std::fs::write(&metrics_path, json)
            .with_context(|| format!("Failed to write {}", metrics_path.display()))?;
        info!("📁 Metrics saved to: {}", metrics_path.display());
    }

    Ok(())
}
