//! Pooled SQLite connections.

use crate::error::{EngineError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open a bounded pool for a database file, creating it if needed.
///
/// `timeout` bounds both pool checkout and SQLite's busy wait.
pub fn open_pool(path: &Path, max_size: u32, timeout: Duration) -> Result<DbPool> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::Storage(format!("creating {}: {}", dir.display(), e)))?;
    }
    let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
        conn.busy_timeout(timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Ok(())
    });
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(timeout)
        .build(manager)?;
    info!("Opened SQLite pool at {} (max {} connections)", path.display(), max_size.max(1));
    Ok(pool)
}

/// Single-connection in-memory pool. Every checkout sees the same database.
pub fn open_in_memory() -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_secs(5))
        .build(SqliteConnectionManager::memory())?;
    Ok(pool)
}
