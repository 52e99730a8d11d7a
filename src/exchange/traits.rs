//! Venue-agnostic trait for candle providers.

use crate::exchange::types::{Candle, CandleRequest};
use async_trait::async_trait;

/// Source of historical candles.
///
/// Implementations return candles in ascending open-time order, at most
/// `request.limit` of them, starting at or after `request.since`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(&self, request: &CandleRequest) -> anyhow::Result<Vec<Candle>>;
}
