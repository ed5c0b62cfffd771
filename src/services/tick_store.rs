//! SQLite-backed tick and market lookup.

use super::db::DbPool;
use super::market_data::MarketDataProvider;
use crate::error::Result;
use crate::types::Tick;
use rusqlite::{params, OptionalExtension};

/// Reads ticks and active markets from the shared database.
pub struct SqliteTickStore {
    pool: DbPool,
}

impl SqliteTickStore {
    /// Wrap a pool, creating the tables if they do not exist.
    pub fn new(pool: DbPool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS markets (
                ticker TEXT PRIMARY KEY,
                asset TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
            );
            CREATE INDEX IF NOT EXISTS idx_markets_asset ON markets(asset, close_time);

            CREATE TABLE IF NOT EXISTS ticks (
                market TEXT NOT NULL,
                t INTEGER NOT NULL,
                yes_bid REAL,
                yes_ask REAL,
                no_bid REAL,
                no_ask REAL,
                PRIMARY KEY (market, t)
            );",
        )?;
        Ok(())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// The active market for `asset` whose trading window contains `now_ms`.
    /// The most recently opened one wins when windows overlap.
    pub fn resolve_market_at(&self, asset: &str, now_ms: i64) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let ticker = conn
            .query_row(
                "SELECT ticker FROM markets
                 WHERE asset = ?1 COLLATE NOCASE
                   AND status = 'active'
                   AND open_time <= ?2 AND close_time > ?2
                 ORDER BY open_time DESC
                 LIMIT 1",
                params![asset, now_ms],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(ticker)
    }
}

impl MarketDataProvider for SqliteTickStore {
    fn resolve_market(&self, asset: &str) -> Result<Option<String>> {
        self.resolve_market_at(asset, chrono::Utc::now().timestamp_millis())
    }

    fn load_ticks(&self, market: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT t, yes_bid, yes_ask, no_bid, no_ask FROM ticks
             WHERE market = ?1 AND t >= ?2 AND t < ?3
             ORDER BY t ASC",
        )?;
        let ticks = stmt
            .query_map(params![market, start_ms, end_ms], |row| {
                Ok(Tick {
                    t: row.get(0)?,
                    yes_bid: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    yes_ask: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    no_bid: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    no_ask: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ticks)
    }
}
