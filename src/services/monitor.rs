//! Live strategy monitor.
//!
//! Once per minute (plus a settle delay) every active strategy is evaluated
//! against the most recent closed candles of its market. Satisfied strategies
//! are delivered as [`StrategyTrigger`]s over a bounded channel.

use super::cache::{BoundedCache, CacheStats};
use super::candles::build_closed_candles;
use super::conditions::{CompiledStrategy, ResolvedIndicator, SeriesFrame};
use super::indicator_store::{IndicatorStore, SeriesKey};
use super::indicators;
use super::market_data::{call_blocking, MarketDataProvider, StrategyProvider};
use crate::config::MonitorConfig;
use crate::error::{EngineError, Result};
use crate::types::{
    params_key, Candle, IndicatorConfig, IndicatorResult, Strategy, StrategyTrigger, Timeframe, TriggerPolicy,
};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MINUTE_MS: i64 = 60_000;

/// Shared cache of computed indicator series.
pub type SeriesCache = BoundedCache<Arc<Vec<IndicatorResult>>>;

/// Summary of one monitor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Strategies evaluated.
    pub evaluated: usize,
    /// Triggers emitted.
    pub triggered: usize,
    /// Strategies that failed to compile or evaluate.
    pub failed: usize,
    /// True when the cycle did not run because another was in flight.
    pub skipped: bool,
}

/// Clears the in-flight flag when a cycle ends, including on cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Milliseconds from `now_ms` until the next cycle: the next minute boundary
/// plus `settle_ms`.
pub fn delay_until_next_cycle(now_ms: i64, settle_ms: u64) -> Duration {
    let settle = settle_ms as i64 % MINUTE_MS;
    let mut next = now_ms.div_euclid(MINUTE_MS) * MINUTE_MS + settle;
    if next <= now_ms {
        next += MINUTE_MS;
    }
    Duration::from_millis((next - now_ms) as u64)
}

/// Evaluates active strategies on a minute-aligned schedule.
pub struct StrategyMonitor {
    config: MonitorConfig,
    strategies: Arc<dyn StrategyProvider>,
    market_data: Arc<dyn MarketDataProvider>,
    cache: Arc<SeriesCache>,
    store: Option<Arc<IndicatorStore>>,
    triggers: mpsc::Sender<StrategyTrigger>,
    /// Condition-set outcome from the previous cycle, per strategy.
    last_state: DashMap<String, bool>,
    /// Last emission time (ms), per strategy.
    last_fired: DashMap<String, i64>,
    in_flight: AtomicBool,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyMonitor {
    /// Create a monitor and the receiving end of its trigger channel.
    pub fn new(
        config: MonitorConfig,
        strategies: Arc<dyn StrategyProvider>,
        market_data: Arc<dyn MarketDataProvider>,
        cache: Arc<SeriesCache>,
        store: Option<Arc<IndicatorStore>>,
    ) -> (Arc<Self>, mpsc::Receiver<StrategyTrigger>) {
        let (triggers, receiver) = mpsc::channel(config.trigger_channel_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);

        let monitor = Arc::new(Self {
            config,
            strategies,
            market_data,
            cache,
            store,
            triggers,
            last_state: DashMap::new(),
            last_fired: DashMap::new(),
            in_flight: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown_tx,
            handle: Mutex::new(None),
        });
        (monitor, receiver)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Spawn the minute-aligned evaluation loop. No-op when already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let monitor = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let settle_ms = self.config.settle_delay_ms;

        let handle = tokio::spawn(async move {
            info!(settle_ms, "Strategy monitor started");
            loop {
                let delay = delay_until_next_cycle(chrono::Utc::now().timestamp_millis(), settle_ms);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        match monitor.run_cycle().await {
                            Ok(report) if report.skipped => {}
                            Ok(report) => debug!(
                                evaluated = report.evaluated,
                                triggered = report.triggered,
                                failed = report.failed,
                                "Monitor cycle complete"
                            ),
                            Err(e) => error!("Monitor cycle failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Strategy monitor received shutdown signal");
                        break;
                    }
                }
            }
        });

        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Stop the loop, aborting a cycle in progress.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        if let Ok(mut slot) = self.handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        info!("Strategy monitor stopped");
    }

    /// Run one cycle as of now.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(chrono::Utc::now().timestamp_millis()).await
    }

    /// Run one cycle treating `now_ms` as the current time.
    pub async fn run_cycle_at(&self, now_ms: i64) -> Result<CycleReport> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("Previous monitor cycle still running, skipping");
            return Ok(CycleReport {
                skipped: true,
                ..CycleReport::default()
            });
        }
        let _guard = InFlight(&self.in_flight);

        let timeout = self.config.cycle_timeout();
        match tokio::time::timeout(timeout, self.cycle(now_ms)).await {
            Ok(report) => report,
            Err(_) => Err(EngineError::Timeout(format!("monitor cycle after {:?}", timeout))),
        }
    }

    async fn cycle(&self, now_ms: i64) -> Result<CycleReport> {
        let provider = Arc::clone(&self.strategies);
        let strategies = call_blocking("load strategies", self.config.io_timeout(), move || {
            provider.active_strategies()
        })
        .await?;

        let mut report = CycleReport::default();
        let mut compiled = Vec::with_capacity(strategies.len());
        for strategy in strategies.into_iter().filter(|s| s.is_active) {
            match CompiledStrategy::compile(&strategy) {
                Ok(c) => compiled.push(c),
                Err(e) => {
                    warn!(strategy_id = %strategy.id, "Skipping invalid strategy: {}", e);
                    report.failed += 1;
                }
            }
        }
        report.evaluated = compiled.len();

        // Triggers go out as each strategy finishes. Policy state is committed
        // only once the send succeeds, so a cycle cut short by the timeout
        // leaves undelivered triggers eligible to fire next cycle.
        let mut outcomes =
            stream::iter(compiled.into_iter().map(|strategy| self.evaluate_owned(strategy, now_ms)))
                .buffer_unordered(self.config.strategy_concurrency.max(1));

        while let Some((strategy_id, outcome)) = outcomes.next().await {
            match outcome {
                Ok(Some(trigger)) => {
                    info!(
                        strategy_id = %trigger.strategy_id,
                        market = %trigger.market,
                        conditions = ?trigger.triggered_conditions,
                        "Strategy triggered"
                    );
                    let fired_at = trigger.timestamp;
                    if self.triggers.send(trigger).await.is_err() {
                        warn!(strategy_id = %strategy_id, "Trigger receiver dropped");
                    } else {
                        self.commit(&strategy_id, true, Some(fired_at));
                        report.triggered += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(strategy_id = %strategy_id, "Strategy evaluation failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn evaluate_owned(
        &self,
        strategy: CompiledStrategy,
        now_ms: i64,
    ) -> (String, Result<Option<StrategyTrigger>>) {
        let outcome = self.evaluate_strategy(&strategy, now_ms).await;
        (strategy.id().to_string(), outcome)
    }

    async fn evaluate_strategy(&self, compiled: &CompiledStrategy, now_ms: i64) -> Result<Option<StrategyTrigger>> {
        let strategy = &compiled.strategy;
        let io_timeout = self.config.io_timeout();

        let provider = Arc::clone(&self.market_data);
        let asset = strategy.asset.clone();
        let market = call_blocking("resolve market", io_timeout, move || provider.resolve_market(&asset))
            .await?
            .ok_or_else(|| EngineError::MarketNotFound(strategy.asset.clone()))?;

        let mut timeframes: Vec<Timeframe> = compiled.indicators.iter().map(|i| i.timeframe).collect();
        timeframes.push(strategy.timeframe);
        timeframes.sort_by_key(|tf| tf.duration_ms());
        timeframes.dedup();

        let longest = timeframes.last().map(|tf| tf.duration_ms()).unwrap_or(MINUTE_MS);
        // Whole buckets only, so no series is seeded from a partial first candle.
        let start_ms = (now_ms - longest * self.config.max_lookback_candles as i64).div_euclid(longest) * longest;
        let provider = Arc::clone(&self.market_data);
        let tick_market = market.clone();
        let ticks = call_blocking("load ticks", io_timeout, move || {
            provider.load_ticks(&tick_market, start_ms, now_ms)
        })
        .await?;

        let candles: HashMap<Timeframe, Vec<Candle>> = timeframes
            .iter()
            .map(|tf| (*tf, build_closed_candles(&ticks, *tf, strategy.direction, now_ms)))
            .collect();

        let Some(primary) = candles.get(&strategy.timeframe).filter(|c| !c.is_empty()) else {
            debug!(strategy_id = %strategy.id, market = %market, "No closed candles yet");
            return Ok(None);
        };

        let mut frame = SeriesFrame::new(primary.clone());
        for indicator in &compiled.indicators {
            let tf_candles = candles.get(&indicator.timeframe).map(Vec::as_slice).unwrap_or(&[]);
            let series = self.series_for(&market, strategy, indicator, tf_candles);
            frame.insert_indicator(&indicator.config.id, series.as_ref().clone());
        }

        let recent = frame.tail(2);
        let Some(last_index) = recent.len().checked_sub(1) else {
            return Ok(None);
        };
        let outcome = compiled.evaluate(&recent, last_index);

        if !self.should_fire(&strategy.id, outcome.satisfied, now_ms) {
            self.commit(&strategy.id, outcome.satisfied, None);
            return Ok(None);
        }

        let candle_timestamp = recent.candle(last_index).map(|c| c.timestamp).unwrap_or(now_ms);
        Ok(Some(StrategyTrigger {
            strategy_id: strategy.id.clone(),
            market,
            triggered_conditions: outcome.matched,
            indicator_values: recent.latest_values(),
            candle_timestamp,
            timestamp: now_ms,
        }))
    }

    /// Series for one indicator, from the cache or freshly computed.
    fn series_for(
        &self,
        market: &str,
        strategy: &Strategy,
        indicator: &ResolvedIndicator,
        candles: &[Candle],
    ) -> Arc<Vec<IndicatorResult>> {
        let config = &indicator.config;
        let last_open = candles.last().map(|c| c.timestamp).unwrap_or_default();
        let key = format!(
            "{}:{}:{}:{}:{}:{}",
            market,
            indicator.timeframe,
            strategy.direction,
            config.kind,
            params_key(&config.parameters),
            last_open
        );

        if let Some(series) = self.cache.get(&key) {
            return series;
        }

        let series = Arc::new(indicators::compute_config(config, candles));
        self.cache.set(key, Arc::clone(&series));
        self.persist(&strategy.asset, indicator.timeframe, config.clone(), Arc::clone(&series));
        series
    }

    /// Write a computed series to the indicator store in the background.
    fn persist(
        &self,
        asset: &str,
        timeframe: Timeframe,
        config: IndicatorConfig,
        series: Arc<Vec<IndicatorResult>>,
    ) {
        if !self.config.persist_indicators || series.is_empty() {
            return;
        }
        let Some(store) = self.store.clone() else {
            return;
        };
        let asset = asset.to_string();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                store.upsert_series(
                    SeriesKey {
                        asset: &asset,
                        timeframe,
                        kind: config.kind,
                        params: &config.parameters,
                    },
                    &series,
                )
            })
            .await;
            match result {
                Ok(Ok(rows)) => debug!(rows, "Persisted indicator series"),
                Ok(Err(e)) => warn!("Failed to persist indicator series: {}", e),
                Err(e) => warn!("Indicator persistence task failed: {}", e),
            }
        });
    }

    /// Apply the trigger policy to this cycle's outcome. Read-only; see
    /// [`Self::commit`].
    fn should_fire(&self, strategy_id: &str, satisfied: bool, now_ms: i64) -> bool {
        if !satisfied {
            return false;
        }
        match self.config.trigger_policy {
            TriggerPolicy::EveryCycle => true,
            TriggerPolicy::Edge => !self.last_state.get(strategy_id).map(|s| *s).unwrap_or(false),
            TriggerPolicy::Cooldown { secs } => match self.last_fired.get(strategy_id).map(|t| *t) {
                Some(last) => now_ms - last >= secs as i64 * 1_000,
                None => true,
            },
        }
    }

    /// Record a strategy's outcome, and its emission time once delivered.
    fn commit(&self, strategy_id: &str, satisfied: bool, fired_at: Option<i64>) {
        self.last_state.insert(strategy_id.to_string(), satisfied);
        if let Some(at) = fired_at {
            self.last_fired.insert(strategy_id.to_string(), at);
        }
    }
}
