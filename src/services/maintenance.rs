//! Background upkeep for the indicator store: retention cleanup and
//! precomputation of the standard catalogue for tracked assets.

use super::candles::build_closed_candles;
use super::indicator_store::IndicatorStore;
use super::market_data::{call_blocking, MarketDataProvider};
use crate::config::IndicatorCacheConfig;
use crate::error::{EngineError, Result};
use crate::types::{Direction, Timeframe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct IndicatorMaintenance {
    store: Arc<IndicatorStore>,
    market_data: Arc<dyn MarketDataProvider>,
    config: IndicatorCacheConfig,
    io_timeout: Duration,
}

impl IndicatorMaintenance {
    pub fn new(
        store: Arc<IndicatorStore>,
        market_data: Arc<dyn MarketDataProvider>,
        config: IndicatorCacheConfig,
        io_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            market_data,
            config,
            io_timeout,
        })
    }

    /// Spawn the cleanup loop, and the precompute loop when assets are configured.
    pub fn start(self: Arc<Self>) {
        info!(
            retention_days = self.config.retention_days,
            assets = self.config.precompute_assets.len(),
            "Starting indicator maintenance"
        );

        let maintenance = Arc::clone(&self);
        tokio::spawn(async move {
            maintenance.cleanup_loop().await;
        });

        if !self.config.precompute_assets.is_empty() {
            let maintenance = Arc::clone(&self);
            tokio::spawn(async move {
                maintenance.precompute_loop().await;
            });
        }
    }

    async fn cleanup_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_secs.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = self.run_cleanup(chrono::Utc::now().timestamp_millis()).await {
                error!("Indicator cleanup failed: {}", e);
            }
        }
    }

    async fn precompute_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.precompute_interval_secs.max(1)));
        loop {
            interval.tick().await;
            let rows = self.run_precompute(chrono::Utc::now().timestamp_millis()).await;
            debug!(rows, "Precompute pass complete");
        }
    }

    /// Delete stored values older than the retention window.
    pub async fn run_cleanup(&self, now_ms: i64) -> Result<usize> {
        let store = Arc::clone(&self.store);
        let days = self.config.retention_days;
        call_blocking("indicator cleanup", self.io_timeout, move || store.cleanup_before(days, now_ms)).await
    }

    /// Precompute every configured (asset, timeframe). Failures are logged per
    /// asset and skipped; returns the rows written.
    pub async fn run_precompute(&self, now_ms: i64) -> usize {
        let mut written = 0;
        for asset in &self.config.precompute_assets {
            match self.precompute_asset(asset, now_ms).await {
                Ok(rows) => written += rows,
                Err(e) => warn!(asset = %asset, "Precompute skipped: {}", e),
            }
        }
        written
    }

    async fn precompute_asset(&self, asset: &str, now_ms: i64) -> Result<usize> {
        let provider = Arc::clone(&self.market_data);
        let lookup = asset.to_string();
        let market = call_blocking("resolve market", self.io_timeout, move || provider.resolve_market(&lookup))
            .await?
            .ok_or_else(|| EngineError::MarketNotFound(asset.to_string()))?;

        let longest = self
            .config
            .precompute_timeframes
            .iter()
            .map(Timeframe::duration_ms)
            .max()
            .unwrap_or(0);
        let start_ms = now_ms - longest * self.config.precompute_lookback_candles as i64;

        let provider = Arc::clone(&self.market_data);
        let ticks = call_blocking("load ticks", self.io_timeout, move || {
            provider.load_ticks(&market, start_ms, now_ms)
        })
        .await?;

        let mut written = 0;
        for timeframe in self.config.precompute_timeframes.clone() {
            let candles = build_closed_candles(&ticks, timeframe, Direction::Long, now_ms);
            if candles.is_empty() {
                continue;
            }
            let store = Arc::clone(&self.store);
            let asset = asset.to_string();
            written += call_blocking("precompute", self.io_timeout, move || {
                Ok(store.precompute(&asset, timeframe, &candles))
            })
            .await?;
        }
        Ok(written)
    }
}
