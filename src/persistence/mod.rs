//! SQLite cache for downloaded candles.
//!
//! Keeps downloads across runs:
//! - Candles keyed by symbol, market, interval and open time
//! - A fetch log recording which requests are fully cached

use crate::exchange::{Candle, CandleRequest};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info, warn};

/// SQLite-based candle store.
pub struct CandleStore {
    conn: Connection,
}

impl CandleStore {
    /// Open (or create) the cache, initializing the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {:?}", parent))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Candle cache initialized at {:?}", db_path);
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, market, interval, open_time)
            );

            CREATE TABLE IF NOT EXISTS fetch_log (
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                interval TEXT NOT NULL,
                since INTEGER NOT NULL,
                request_limit INTEGER NOT NULL,
                candle_count INTEGER NOT NULL,
                last_open_time INTEGER,
                fetched_at TEXT NOT NULL,
                PRIMARY KEY (symbol, market, interval, since, request_limit)
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Load the candles of a previously saved request.
    ///
    /// Returns `None` when the request was never cached.
    pub fn load(&self, request: &CandleRequest) -> Result<Option<Vec<Candle>>> {
        let logged: Option<(i64, Option<i64>)> = self
            .conn
            .query_row(
                r#"
                SELECT candle_count, last_open_time FROM fetch_log
                WHERE symbol = ?1 AND market = ?2 AND interval = ?3
                  AND since = ?4 AND request_limit = ?5
                "#,
                params![
                    request.symbol,
                    request.market.as_str(),
                    request.interval,
                    request.since.timestamp_millis(),
                    request.limit as i64,
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((count, last_open_time)) = logged else {
            return Ok(None);
        };
        let Some(last_open_time) = last_open_time else {
            return Ok(Some(Vec::new()));
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT open_time, open, high, low, close, volume FROM candles
            WHERE symbol = ?1 AND market = ?2 AND interval = ?3
              AND open_time >= ?4 AND open_time <= ?5
            ORDER BY open_time
            LIMIT ?6
            "#,
        )?;

        let rows = stmt.query_map(
            params![
                request.symbol,
                request.market.as_str(),
                request.interval,
                request.since.timestamp_millis(),
                last_open_time,
                request.limit as i64,
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            },
        )?;

        let mut candles = Vec::new();
        for row in rows {
            let (open_ms, open, high, low, close, volume) = row?;
            let open_time = DateTime::<Utc>::from_timestamp_millis(open_ms)
                .with_context(|| format!("Cached open time out of range: {open_ms}"))?;
            candles.push(Candle {
                open_time,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        if candles.len() as i64 != count {
            warn!(
                request = %request,
                expected = count,
                found = candles.len(),
                "Cached candle count mismatch, treating as miss"
            );
            return Ok(None);
        }

        Ok(Some(candles))
    }

    /// Store the result of a request.
    pub fn save(&self, request: &CandleRequest, candles: &[Candle]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        for candle in candles {
            tx.execute(
                r#"
                INSERT INTO candles (symbol, market, interval, open_time, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(symbol, market, interval, open_time) DO UPDATE SET
                    open = ?5,
                    high = ?6,
                    low = ?7,
                    close = ?8,
                    volume = ?9
                "#,
                params![
                    request.symbol,
                    request.market.as_str(),
                    request.interval,
                    candle.open_time.timestamp_millis(),
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                ],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO fetch_log (symbol, market, interval, since, request_limit,
                                   candle_count, last_open_time, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(symbol, market, interval, since, request_limit) DO UPDATE SET
                candle_count = ?6,
                last_open_time = ?7,
                fetched_at = ?8
            "#,
            params![
                request.symbol,
                request.market.as_str(),
                request.interval,
                request.since.timestamp_millis(),
                request.limit as i64,
                candles.len() as i64,
                candles.last().map(|c| c.open_time.timestamp_millis()),
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.commit()?;

        debug!(
            request = %request,
            candles = candles.len(),
            "Candles saved to cache"
        );
        Ok(())
    }

    /// Clear all cached data.
    pub fn clear(&self) -> Result<()> {
        warn!("Clearing candle cache");
        self.conn.execute_batch(
            r#"
            DELETE FROM candles;
            DELETE FROM fetch_log;
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Market;
    use chrono::{Duration, TimeZone};

    fn since() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn candles(n: i64, base: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                open_time: since() + Duration::minutes(5 * i),
                open: base + i as f64,
                high: base + i as f64 + 1.0,
                low: base + i as f64 - 1.0,
                close: base + i as f64 + 0.5,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_uncached_request_is_miss() {
        let store = CandleStore::in_memory().unwrap();
        let request = CandleRequest::new(Market::Spot, "BTCUSDT", "5m", since(), 10);
        assert!(store.load(&request).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = CandleStore::in_memory().unwrap();
        let request = CandleRequest::new(Market::Spot, "BTCUSDT", "5m", since(), 10);
        let data = candles(10, 42000.0);

        store.save(&request, &data).unwrap();
        let loaded = store.load(&request).unwrap().unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_markets_are_kept_apart() {
        let store = CandleStore::in_memory().unwrap();
        let spot = CandleRequest::new(Market::Spot, "BTCUSDT", "5m", since(), 5);
        let futures = spot.for_market(Market::Futures);

        store.save(&spot, &candles(5, 100.0)).unwrap();
        assert!(store.load(&futures).unwrap().is_none());

        store.save(&futures, &candles(5, 200.0)).unwrap();
        assert_eq!(store.load(&spot).unwrap().unwrap()[0].open, 100.0);
        assert_eq!(store.load(&futures).unwrap().unwrap()[0].open, 200.0);
    }

    #[test]
    fn test_overlapping_requests_are_bounded() {
        let store = CandleStore::in_memory().unwrap();
        let short = CandleRequest::new(Market::Spot, "BTCUSDT", "5m", since(), 3);
        let long = CandleRequest::new(Market::Spot, "BTCUSDT", "5m", since(), 8);

        store.save(&long, &candles(8, 100.0)).unwrap();
        store.save(&short, &candles(3, 100.0)).unwrap();

        assert_eq!(store.load(&short).unwrap().unwrap().len(), 3);
        assert_eq!(store.load(&long).unwrap().unwrap().len(), 8);
    }

    #[test]
    fn test_empty_result_is_cached() {
        let store = CandleStore::in_memory().unwrap();
        let request = CandleRequest::new(Market::Futures, "NEWUSDT", "1h", since(), 100);

        store.save(&request, &[]).unwrap();
        assert_eq!(store.load(&request).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_clear() {
        let store = CandleStore::in_memory().unwrap();
        let request = CandleRequest::new(Market::Spot, "BTCUSDT", "5m", since(), 4);

        store.save(&request, &candles(4, 1.0)).unwrap();
        store.clear().unwrap();
        assert!(store.load(&request).unwrap().is_none());
    }
}
