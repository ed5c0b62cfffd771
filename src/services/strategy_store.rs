//! SQLite-backed strategy lookup.

use super::db::DbPool;
use super::market_data::StrategyProvider;
use crate::error::Result;
use crate::types::Strategy;
use rusqlite::params;
use tracing::warn;

/// Reads active strategies stored as JSON documents. Never writes them.
pub struct SqliteStrategyStore {
    pool: DbPool,
}

impl SqliteStrategyStore {
    pub fn new(pool: DbPool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                is_active INTEGER NOT NULL DEFAULT 1,
                config_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_strategies_active ON strategies(is_active);",
        )?;
        Ok(())
    }
}

impl StrategyProvider for SqliteStrategyStore {
    /// Active strategies. Rows whose JSON does not parse are logged and skipped.
    fn active_strategies(&self) -> Result<Vec<Strategy>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, config_json FROM strategies WHERE is_active = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![1], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let strategies = rows
            .into_iter()
            .filter_map(|(id, json)| match serde_json::from_str::<Strategy>(&json) {
                Ok(mut strategy) => {
                    strategy.id = id;
                    strategy.is_active = true;
                    Some(strategy)
                }
                Err(e) => {
                    warn!(strategy_id = %id, "Skipping unreadable strategy: {}", e);
                    None
                }
            })
            .collect();
        Ok(strategies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::db::open_in_memory;

    #[test]
    fn test_active_strategies_skips_inactive_and_broken() {
        let store = SqliteStrategyStore::new(open_in_memory().unwrap()).unwrap();
        let conn = store.pool.get().unwrap();
        let json = r#"{"id": "ignored", "asset": "BTC", "timeframe": "15m"}"#;
        conn.execute("INSERT INTO strategies (id, is_active, config_json) VALUES ('a', 1, ?1)", params![json])
            .unwrap();
        conn.execute("INSERT INTO strategies (id, is_active, config_json) VALUES ('b', 0, ?1)", params![json])
            .unwrap();
        conn.execute("INSERT INTO strategies (id, is_active, config_json) VALUES ('c', 1, 'not json')", [])
            .unwrap();
        drop(conn);

        let strategies = store.active_strategies().unwrap();
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].id, "a");
        assert!(strategies[0].is_active);
    }
}
