//! Persistent cache of precomputed indicator series.

use super::db::DbPool;
use super::indicators;
use crate::error::Result;
use crate::types::{params_key, Candle, IndicatorKind, IndicatorParams, IndicatorResult, Timeframe};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const DAY_MS: i64 = 86_400_000;

/// One entry of the standard indicator catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueEntry {
    pub kind: IndicatorKind,
    pub params: IndicatorParams,
}

impl CatalogueEntry {
    fn new(kind: IndicatorKind, params: &[(&str, f64)]) -> Self {
        Self {
            kind,
            params: params.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

/// Indicators precomputed for every tracked (asset, timeframe).
pub fn standard_catalogue() -> Vec<CatalogueEntry> {
    vec![
        CatalogueEntry::new(IndicatorKind::Rsi, &[("period", 7.0)]),
        CatalogueEntry::new(IndicatorKind::Rsi, &[("period", 14.0)]),
        CatalogueEntry::new(IndicatorKind::Rsi, &[("period", 21.0)]),
        CatalogueEntry::new(IndicatorKind::Macd, &[("fast", 12.0), ("slow", 26.0), ("signal", 9.0)]),
        CatalogueEntry::new(IndicatorKind::Sma, &[("period", 20.0)]),
        CatalogueEntry::new(IndicatorKind::Sma, &[("period", 50.0)]),
        CatalogueEntry::new(IndicatorKind::Ema, &[("period", 9.0)]),
        CatalogueEntry::new(IndicatorKind::Ema, &[("period", 21.0)]),
        CatalogueEntry::new(IndicatorKind::Bollinger, &[("period", 20.0), ("stdDev", 2.0)]),
        CatalogueEntry::new(
            IndicatorKind::Stochastic,
            &[("kLength", 14.0), ("smoothK", 3.0), ("dLength", 3.0)],
        ),
        CatalogueEntry::new(IndicatorKind::Atr, &[("period", 14.0)]),
        CatalogueEntry::new(IndicatorKind::Vwap, &[("resetDaily", 1.0)]),
        CatalogueEntry::new(IndicatorKind::RollingUpPercent, &[("period", 20.0)]),
    ]
}

/// Identifies one stored series.
#[derive(Debug, Clone, Copy)]
pub struct SeriesKey<'a> {
    pub asset: &'a str,
    pub timeframe: Timeframe,
    pub kind: IndicatorKind,
    pub params: &'a IndicatorParams,
}

/// SQLite store of indicator values keyed by
/// (asset, timeframe, indicator_type, indicator_params, timestamp).
pub struct IndicatorStore {
    pool: DbPool,
}

impl IndicatorStore {
    pub fn new(pool: DbPool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS indicator_cache (
                asset TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                indicator_type TEXT NOT NULL,
                indicator_params TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                value REAL,
                values_json TEXT,
                updated_at INTEGER NOT NULL,
                UNIQUE (asset, timeframe, indicator_type, indicator_params, timestamp)
            );
            CREATE INDEX IF NOT EXISTS idx_indicator_cache_lookup
                ON indicator_cache(asset, timeframe, indicator_type, indicator_params, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_indicator_cache_timestamp
                ON indicator_cache(timestamp);",
        )?;
        Ok(())
    }

    /// Upsert every defined point of a series in one transaction.
    /// Returns the number of rows written.
    pub fn upsert_series(&self, key: SeriesKey<'_>, series: &[IndicatorResult]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let params_json = params_key(key.params);
        let now = chrono::Utc::now().timestamp_millis();
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO indicator_cache
                 (asset, timeframe, indicator_type, indicator_params, timestamp, value, values_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(asset, timeframe, indicator_type, indicator_params, timestamp) DO UPDATE SET
                    value = excluded.value,
                    values_json = excluded.values_json,
                    updated_at = excluded.updated_at",
            )?;
            for point in series.iter().filter(|p| p.is_defined()) {
                let values_json = match &point.values {
                    Some(values) => Some(serde_json::to_string(values)?),
                    None => None,
                };
                stmt.execute(params![
                    key.asset,
                    key.timeframe.as_str(),
                    key.kind.as_str(),
                    params_json,
                    point.timestamp,
                    point.value,
                    values_json,
                    now,
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Points with `start_ms <= timestamp <= end_ms`, oldest first.
    pub fn range(&self, key: SeriesKey<'_>, start_ms: i64, end_ms: i64) -> Result<Vec<IndicatorResult>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, value, values_json FROM indicator_cache
             WHERE asset = ?1 AND timeframe = ?2 AND indicator_type = ?3 AND indicator_params = ?4
               AND timestamp >= ?5 AND timestamp <= ?6
             ORDER BY timestamp ASC",
        )?;
        let points = stmt
            .query_map(
                params![
                    key.asset,
                    key.timeframe.as_str(),
                    key.kind.as_str(),
                    params_key(key.params),
                    start_ms,
                    end_ms
                ],
                read_point,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }

    /// Most recent stored point.
    pub fn latest(&self, key: SeriesKey<'_>) -> Result<Option<IndicatorResult>> {
        let conn = self.pool.get()?;
        let point = conn
            .query_row(
                "SELECT timestamp, value, values_json FROM indicator_cache
                 WHERE asset = ?1 AND timeframe = ?2 AND indicator_type = ?3 AND indicator_params = ?4
                 ORDER BY timestamp DESC
                 LIMIT 1",
                params![
                    key.asset,
                    key.timeframe.as_str(),
                    key.kind.as_str(),
                    params_key(key.params)
                ],
                read_point,
            )
            .optional()?;
        Ok(point)
    }

    /// Delete rows whose candle timestamp is older than `retention_days` before `now_ms`.
    pub fn cleanup_before(&self, retention_days: u32, now_ms: i64) -> Result<usize> {
        let cutoff = now_ms - retention_days as i64 * DAY_MS;
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM indicator_cache WHERE timestamp < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            info!("Indicator cache cleanup removed {} rows older than {} days", deleted, retention_days);
        }
        Ok(deleted)
    }

    pub fn cleanup(&self, retention_days: u32) -> Result<usize> {
        self.cleanup_before(retention_days, chrono::Utc::now().timestamp_millis())
    }

    /// Compute the standard catalogue over `candles` and store it.
    ///
    /// Write failures are logged per indicator and never returned; the result
    /// is the total number of rows written.
    pub fn precompute(&self, asset: &str, timeframe: Timeframe, candles: &[Candle]) -> usize {
        let mut written = 0;
        for entry in standard_catalogue() {
            let series = indicators::compute(entry.kind, &entry.params, candles);
            let key = SeriesKey {
                asset,
                timeframe,
                kind: entry.kind,
                params: &entry.params,
            };
            match self.upsert_series(key, &series) {
                Ok(n) => written += n,
                Err(e) => warn!(
                    asset = %asset,
                    timeframe = %timeframe,
                    indicator = %entry.kind,
                    "Failed to store precomputed indicator: {}",
                    e
                ),
            }
        }
        debug!(asset = %asset, timeframe = %timeframe, rows = written, "Precomputed indicator catalogue");
        written
    }
}

/// Decode one row. Unreadable `values_json` is logged and dropped; the
/// primary value is still returned.
fn read_point(row: &Row<'_>) -> rusqlite::Result<IndicatorResult> {
    let timestamp: i64 = row.get(0)?;
    let values_json: Option<String> = row.get(2)?;
    let values = values_json.and_then(|json| {
        match serde_json::from_str::<BTreeMap<String, Option<f64>>>(&json) {
            Ok(values) => Some(values),
            Err(e) => {
                warn!(timestamp, "Ignoring unreadable indicator values: {}", e);
                None
            }
        }
    });
    Ok(IndicatorResult {
        timestamp,
        value: row.get(1)?,
        values,
    })
}
