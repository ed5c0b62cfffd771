use anyhow::Context;
use market_signals::config::Config;
use market_signals::services::{
    open_pool, Backtester, IndicatorMaintenance, IndicatorStore, SeriesCache, SqliteStrategyStore,
    SqliteTickStore, StrategyMonitor,
};
use market_signals::types::BacktestRequest;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_signals=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let pool = open_pool(
        Path::new(&config.storage.database_path),
        config.storage.pool_size,
        config.storage.timeout(),
    )
    .with_context(|| format!("opening database {}", config.storage.database_path))?;

    let tick_store = Arc::new(SqliteTickStore::new(pool.clone())?);

    // `market-signals backtest <request.json>` runs one backtest and prints the result.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("backtest") {
        let path = args.get(2).context("usage: market-signals backtest <request.json>")?;
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let request: BacktestRequest = serde_json::from_str(&raw).context("parsing backtest request")?;

        let backtester = Arc::new(Backtester::new(tick_store, config.backtest.clone()));
        let result = backtester.execute(request).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    info!("Starting market signals engine (database: {})", config.storage.database_path);

    let strategy_store = Arc::new(SqliteStrategyStore::new(pool.clone())?);
    let indicator_store = Arc::new(IndicatorStore::new(pool)?);

    IndicatorMaintenance::new(
        indicator_store.clone(),
        tick_store.clone(),
        config.indicator_cache.clone(),
        config.storage.timeout(),
    )
    .start();

    let cache = Arc::new(SeriesCache::new(
        config.monitor.cache_ttl(),
        config.monitor.cache_capacity,
    ));
    let (monitor, mut triggers) = StrategyMonitor::new(
        config.monitor.clone(),
        strategy_store,
        tick_store,
        cache,
        Some(indicator_store),
    );

    tokio::spawn(async move {
        while let Some(trigger) = triggers.recv().await {
            match serde_json::to_string(&trigger) {
                Ok(json) => info!(target: "market_signals::triggers", "{}", json),
                Err(e) => warn!("Failed to encode trigger: {}", e),
            }
        }
    });

    if config.monitor.enabled {
        monitor.start();
    } else {
        info!("Strategy monitor disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    monitor.stop();

    Ok(())
}
