//! Exchange integrations for historical market data.
//!
//! ## Binance
//! Read-only REST access to klines for:
//! - Spot markets (`/api/v3/klines`)
//! - USDT-M perpetual futures (`/fapi/v1/klines`)
//!
//! Downloads go through the SQLite candle cache via [`fetch_cached`].

mod client;
mod traits;
mod types;

pub use client::{BinanceClient, MAX_KLINES_PER_REQUEST};
#[cfg(test)]
pub use traits::MockCandleSource;
pub use traits::CandleSource;
pub use types::*;

use crate::persistence::CandleStore;
use anyhow::Result;
use tracing::{debug, info};

/// Read-through cache: serve a request from the store, or fetch and store it.
pub async fn fetch_cached<S>(
    source: &S,
    store: &CandleStore,
    request: &CandleRequest,
) -> Result<Vec<Candle>>
where
    S: CandleSource + ?Sized,
{
    if let Some(candles) = store.load(request)? {
        debug!(request = %request, candles = candles.len(), "Candle cache hit");
        return Ok(candles);
    }

    debug!(request = %request, "Candle cache miss");
    let candles = source.fetch_candles(request).await?;
    store.save(request, &candles)?;

    info!(
        request = %request,
        candles = candles.len(),
        "Downloaded candles"
    );
    Ok(candles)
}
