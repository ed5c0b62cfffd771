use crate::types::{Timeframe, TriggerPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Split a comma-separated list, dropping empty items.
pub fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}

/// Parse a comma-separated list of timeframe labels, ignoring unknown ones.
pub fn parse_timeframes(s: &str) -> Vec<Timeframe> {
    parse_list(s).iter().filter_map(|tf| Timeframe::parse(tf)).collect()
}

/// Database location and pooling.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// Pool checkout, SQLite busy wait and per-call timeout (ms).
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "market_signals.db".to_string(),
            pool_size: 8,
            timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            pool_size: env_or("DB_POOL_SIZE", defaults.pool_size),
            timeout_ms: env_or("DB_TIMEOUT_MS", defaults.timeout_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Strategy monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Delay after each minute boundary before a cycle starts (ms).
    pub settle_delay_ms: u64,
    /// Deadline for a whole cycle (ms).
    pub cycle_timeout_ms: u64,
    /// Timeout for each store call (ms).
    pub io_timeout_ms: u64,
    /// Indicator cache entry lifetime (seconds).
    pub cache_ttl_secs: u64,
    /// Maximum cached indicator series.
    pub cache_capacity: usize,
    /// Candles loaded per timeframe when evaluating a strategy.
    pub max_lookback_candles: usize,
    /// Strategies evaluated concurrently within a cycle.
    pub strategy_concurrency: usize,
    /// Bound of the trigger channel.
    pub trigger_channel_capacity: usize,
    pub trigger_policy: TriggerPolicy,
    /// Write computed series to the indicator store, best effort.
    pub persist_indicators: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_delay_ms: 1_000,
            cycle_timeout_ms: 50_000,
            io_timeout_ms: 5_000,
            cache_ttl_secs: 55,
            cache_capacity: 1_024,
            max_lookback_candles: 500,
            strategy_concurrency: 4,
            trigger_channel_capacity: 256,
            trigger_policy: TriggerPolicy::EveryCycle,
            persist_indicators: false,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("MONITOR_ENABLED", defaults.enabled),
            settle_delay_ms: env_or("MONITOR_SETTLE_DELAY_MS", defaults.settle_delay_ms),
            cycle_timeout_ms: env_or("MONITOR_CYCLE_TIMEOUT_MS", defaults.cycle_timeout_ms),
            io_timeout_ms: env_or("DB_TIMEOUT_MS", defaults.io_timeout_ms),
            cache_ttl_secs: env_or("MONITOR_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            cache_capacity: env_or("MONITOR_CACHE_CAPACITY", defaults.cache_capacity),
            max_lookback_candles: env_or("MONITOR_MAX_LOOKBACK", defaults.max_lookback_candles),
            strategy_concurrency: env_or("MONITOR_CONCURRENCY", defaults.strategy_concurrency),
            trigger_channel_capacity: env_or("TRIGGER_CHANNEL_CAPACITY", defaults.trigger_channel_capacity),
            trigger_policy: env::var("TRIGGER_POLICY")
                .ok()
                .and_then(|v| TriggerPolicy::parse(&v))
                .unwrap_or(defaults.trigger_policy),
            persist_indicators: env_bool("PERSIST_INDICATORS", defaults.persist_indicators),
        }
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Minimum candles before a backtest starts evaluating conditions.
pub const MIN_WARMUP_CANDLES: usize = 50;

/// Backtest simulation settings.
#[derive(Debug, Clone)]
pub struct BacktestSettings {
    /// Warm-up candles skipped before evaluation; never below 50.
    pub warmup_candles: usize,
    /// Share of balance committed per entry when no fixed size is given.
    pub position_fraction: f64,
    /// Periods per year used to annualize the Sharpe ratio.
    pub annualization_factor: f64,
    pub max_runtime_secs: u64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            warmup_candles: MIN_WARMUP_CANDLES,
            position_fraction: 0.10,
            annualization_factor: 252.0,
            max_runtime_secs: 120,
        }
    }
}

impl BacktestSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            warmup_candles: env_or("BACKTEST_WARMUP", defaults.warmup_candles).max(MIN_WARMUP_CANDLES),
            position_fraction: env_or("BACKTEST_POSITION_FRACTION", defaults.position_fraction),
            annualization_factor: env_or("BACKTEST_ANNUALIZATION", defaults.annualization_factor),
            max_runtime_secs: env_or("BACKTEST_MAX_RUNTIME_SECS", defaults.max_runtime_secs),
        }
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }
}

/// Indicator store maintenance.
#[derive(Debug, Clone)]
pub struct IndicatorCacheConfig {
    pub retention_days: u32,
    pub cleanup_interval_secs: u64,
    /// Assets whose standard catalogue is precomputed.
    pub precompute_assets: Vec<String>,
    pub precompute_timeframes: Vec<Timeframe>,
    pub precompute_interval_secs: u64,
    /// Candles of history used for each precompute run.
    pub precompute_lookback_candles: usize,
}

impl Default for IndicatorCacheConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            cleanup_interval_secs: 3_600,
            precompute_assets: Vec::new(),
            precompute_timeframes: vec![Timeframe::FifteenMinutes, Timeframe::OneHour],
            precompute_interval_secs: 300,
            precompute_lookback_candles: 300,
        }
    }
}

impl IndicatorCacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timeframes = env::var("PRECOMPUTE_TIMEFRAMES")
            .ok()
            .map(|v| parse_timeframes(&v))
            .filter(|tfs| !tfs.is_empty())
            .unwrap_or(defaults.precompute_timeframes);
        Self {
            retention_days: env_or("INDICATOR_RETENTION_DAYS", defaults.retention_days),
            cleanup_interval_secs: env_or("INDICATOR_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval_secs),
            precompute_assets: env::var("PRECOMPUTE_ASSETS")
                .ok()
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            precompute_timeframes: timeframes,
            precompute_interval_secs: env_or("PRECOMPUTE_INTERVAL_SECS", defaults.precompute_interval_secs),
            precompute_lookback_candles: env_or(
                "PRECOMPUTE_LOOKBACK_CANDLES",
                defaults.precompute_lookback_candles,
            ),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub storage: StorageConfig,
    pub monitor: MonitorConfig,
    pub backtest: BacktestSettings,
    pub indicator_cache: IndicatorCacheConfig,
}

impl Config {
    /// Load configuration from environment variables, defaulting anything unset.
    pub fn from_env() -> Self {
        Self {
            storage: StorageConfig::from_env(),
            monitor: MonitorConfig::from_env(),
            backtest: BacktestSettings::from_env(),
            indicator_cache: IndicatorCacheConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn test_monitor_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(55));
        assert_eq!(config.settle_delay_ms, 1_000);
        assert_eq!(config.trigger_policy, TriggerPolicy::EveryCycle);
        assert!(config.cycle_timeout() < Duration::from_secs(60));
    }

    #[test]
    fn test_backtest_defaults() {
        let settings = BacktestSettings::default();
        assert_eq!(settings.warmup_candles, 50);
        assert_eq!(settings.position_fraction, 0.10);
        assert_eq!(settings.annualization_factor, 252.0);
    }

    #[test]
    fn test_indicator_cache_defaults() {
        let config = IndicatorCacheConfig::default();
        assert_eq!(config.retention_days, 30);
        assert!(config.precompute_assets.is_empty());
    }

    // =========================================================================
    // Parsing helpers
    // =========================================================================

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("BTC, ETH,,SOL "), vec!["BTC", "ETH", "SOL"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_timeframes_skips_unknown() {
        assert_eq!(
            parse_timeframes("15m,bogus,1h"),
            vec![Timeframe::FifteenMinutes, Timeframe::OneHour]
        );
    }

    #[test]
    fn test_env_or_falls_back() {
        assert_eq!(env_or("MARKET_SIGNALS_SURELY_UNSET_VAR", 7u32), 7);
        assert!(env_bool("MARKET_SIGNALS_SURELY_UNSET_VAR", true));
    }
}
