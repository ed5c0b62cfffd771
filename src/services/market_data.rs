//! Read contracts for the external tick and strategy stores.

use crate::error::{EngineError, Result};
use crate::types::{Strategy, Tick};
use std::time::Duration;

/// Source of market ticks.
pub trait MarketDataProvider: Send + Sync {
    /// The market currently tracking `asset`, if any.
    fn resolve_market(&self, asset: &str) -> Result<Option<String>>;

    /// Ticks for `market` with `start_ms <= t < end_ms`, oldest first.
    fn load_ticks(&self, market: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>>;
}

/// Source of strategies to monitor.
pub trait StrategyProvider: Send + Sync {
    fn active_strategies(&self) -> Result<Vec<Strategy>>;
}

/// Run a blocking store call on the blocking pool, bounded by `timeout`.
pub async fn call_blocking<T, F>(what: &str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(joined) => joined?,
        Err(_) => Err(EngineError::Timeout(format!("{} after {:?}", what, timeout))),
    }
}
