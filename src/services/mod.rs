pub mod backtester;
pub mod cache;
pub mod candles;
pub mod conditions;
pub mod db;
pub mod indicator_store;
pub mod indicators;
pub mod maintenance;
pub mod market_data;
pub mod monitor;
pub mod strategy_store;
pub mod tick_store;

pub use backtester::Backtester;
pub use cache::{BoundedCache, CacheStats};
pub use candles::{build_candles, build_closed_candles, CandleBuilder};
pub use conditions::{CompiledCondition, CompiledStrategy, SeriesFrame, Source};
pub use db::{open_in_memory, open_pool, DbPool};
pub use indicator_store::{standard_catalogue, IndicatorStore, SeriesKey};
pub use maintenance::IndicatorMaintenance;
pub use market_data::{MarketDataProvider, StrategyProvider};
pub use monitor::{CycleReport, SeriesCache, StrategyMonitor};
pub use strategy_store::SqliteStrategyStore;
pub use tick_store::SqliteTickStore;
