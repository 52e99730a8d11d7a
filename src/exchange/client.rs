//! Binance REST API client for historical klines.

use crate::config::ExchangeConfig;
use crate::exchange::traits::CandleSource;
use crate::exchange::types::*;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Binance returns at most this many klines per request.
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

const SPOT_KLINES_PATH: &str = "/api/v3/klines";
const FUTURES_KLINES_PATH: &str = "/fapi/v1/klines";

/// Upper bound for the exponential rate-limit back-off.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Binance market data client for spot and USDT-M futures.
pub struct BinanceClient {
    http: Client,
    spot_base_url: String,
    futures_base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if let Some(proxy_url) = config.proxy_url.as_deref().filter(|url| !url.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy_url)
                .with_context(|| format!("Invalid proxy URL: {proxy_url}"))?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            spot_base_url: config.spot_base_url.trim_end_matches('/').to_string(),
            futures_base_url: config.futures_base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn klines_url(&self, market: Market) -> String {
        match market {
            Market::Spot => format!("{}{}", self.spot_base_url, SPOT_KLINES_PATH),
            Market::Futures => format!("{}{}", self.futures_base_url, FUTURES_KLINES_PATH),
        }
    }

    /// Fetch a single page of klines starting at `start_ms`.
    #[instrument(skip(self, request), fields(market = %request.market, symbol = %request.symbol))]
    async fn fetch_page(
        &self,
        request: &CandleRequest,
        start_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = self.klines_url(request.market);
        let query = [
            ("symbol", request.symbol.clone()),
            ("interval", request.interval.clone()),
            ("startTime", start_ms.to_string()),
            ("limit", limit.to_string()),
        ];

        let mut attempt = 0;
        let response = loop {
            let response = self
                .http
                .get(&url)
                .query(&query)
                .send()
                .await
                .with_context(|| format!("Failed to fetch {} klines", request.market))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= self.max_retries
            {
                break response;
            }

            let delay = retry_after(&response)
                .unwrap_or_else(|| backoff_delay(self.retry_delay, attempt));
            attempt += 1;
            warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Rate limited by Binance, backing off"
            );
            tokio::time::sleep(delay).await;
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Binance {} klines request failed with {}: {}",
                request.market,
                status,
                body
            );
        }

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .context("Failed to parse klines response")?;

        rows.iter().map(|row| Candle::from_kline(row)).collect()
    }
}

/// Exponential back-off `base * 2^attempt`, capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// Delay requested by a `Retry-After` header, in seconds.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl CandleSource for BinanceClient {
    /// Download up to `request.limit` candles, page by page.
    #[instrument(skip_all, fields(request = %request))]
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut start_ms = request.since.timestamp_millis();

        while candles.len() < request.limit {
            let page_limit = (request.limit - candles.len()).min(MAX_KLINES_PER_REQUEST);
            let page = self.fetch_page(request, start_ms, page_limit).await?;

            let Some(last) = page.last() else {
                break;
            };
            start_ms = last.open_time.timestamp_millis() + 1;
            let exhausted = page.len() < page_limit;

            debug!(
                page = page.len(),
                total = candles.len() + page.len(),
                next_start = start_ms,
                "Fetched klines page"
            );

            candles.extend(page);
            if exhausted {
                break;
            }
        }

        candles.truncate(request.limit);
        Ok(candles)
    }
}
