//! Tests for the backtesting engine

use market_signals::config::BacktestSettings;
use market_signals::services::backtester::{Backtester, PROFIT_FACTOR_SENTINEL};
use market_signals::services::market_data::MarketDataProvider;
use market_signals::types::{
    BacktestRequest, Candle, Condition, ConditionLogic, ConditionOperator, Direction, ExitReason,
    IndicatorConfig, IndicatorKind, Strategy, Tick, Timeframe,
};
use market_signals::{EngineError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

const MINUTE: i64 = 60_000;

/// Serves one tick per minute from a fixed close series.
struct SeriesMarket {
    closes: Vec<f64>,
}

impl MarketDataProvider for SeriesMarket {
    fn resolve_market(&self, asset: &str) -> Result<Option<String>> {
        Ok(Some(format!("{}-TEST", asset)))
    }

    fn load_ticks(&self, _market: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        Ok(self
            .closes
            .iter()
            .enumerate()
            .map(|(i, &p)| Tick::new(i as i64 * MINUTE, p, p + 1.0, 99.0 - p, 100.0 - p))
            .filter(|t| t.t >= start_ms && t.t < end_ms)
            .collect())
    }
}

/// Holds `load_ticks` until the test releases it.
struct GatedMarket {
    inner: SeriesMarket,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl MarketDataProvider for GatedMarket {
    fn resolve_market(&self, asset: &str) -> Result<Option<String>> {
        self.inner.resolve_market(asset)
    }

    fn load_ticks(&self, market: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        self.gate.lock().unwrap().recv().unwrap();
        self.inner.load_ticks(market, start_ms, end_ms)
    }
}

/// Blocks in `load_ticks` for a fixed time.
struct SlowMarket {
    inner: SeriesMarket,
    delay: Duration,
}

impl MarketDataProvider for SlowMarket {
    fn resolve_market(&self, asset: &str) -> Result<Option<String>> {
        self.inner.resolve_market(asset)
    }

    fn load_ticks(&self, market: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Tick>> {
        std::thread::sleep(self.delay);
        self.inner.load_ticks(market, start_ms, end_ms)
    }
}

fn slow_backtester(delay_ms: u64) -> Backtester {
    let settings = BacktestSettings {
        max_runtime_secs: 1,
        ..BacktestSettings::default()
    };
    let market = SlowMarket {
        inner: SeriesMarket { closes: rising(80) },
        delay: Duration::from_millis(delay_ms),
    };
    Backtester::new(Arc::new(market), settings)
}

fn candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let open = if i == 0 { c } else { closes[i - 1] };
            Candle {
                timestamp: i as i64 * MINUTE,
                open,
                high: open.max(c),
                low: open.min(c),
                close: c,
                volume: 1.0,
            }
        })
        .collect()
}

fn above_sma_strategy() -> Strategy {
    Strategy::new("above-sma", "BTC", Direction::Long, Timeframe::OneMinute)
        .with_indicator(IndicatorConfig::new("sma", IndicatorKind::Sma).with_param("period", 20.0))
        .with_condition(Condition::against_source(
            "c1",
            "price_close",
            ConditionOperator::GreaterThan,
            "indicator_sma",
        ))
}

fn rising(count: usize) -> Vec<f64> {
    (0..count).map(|i| 20.0 + i as f64 * 0.5).collect()
}

fn backtester(closes: Vec<f64>) -> Backtester {
    Backtester::new(Arc::new(SeriesMarket { closes }), BacktestSettings::default())
}

// =============================================================================
// End to end
// =============================================================================

mod end_to_end_tests {
    use super::*;

    #[test]
    fn test_rising_series_alternating_signals_profit() {
        let closes = rising(120);
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, 120 * MINUTE)
            .with_fixed_shares(100);

        let result = assert_ok!(backtester(closes).run(&request));

        assert!(result.trades.len() >= 2);
        assert!(result.metrics.win_rate_pct > 0.0);
        assert!(result.final_balance > result.initial_balance);
        assert_eq!(result.candle_count, 120);
        // Entries and exits alternate bar by bar after warm-up.
        assert_eq!(result.trades[0].entry_time, 50 * MINUTE);
        assert_eq!(result.trades[0].exit_time, 51 * MINUTE);
        assert_eq!(result.metrics.profit_factor, PROFIT_FACTOR_SENTINEL);
    }

    #[test]
    fn test_insufficient_data() {
        let closes = rising(30);
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, 30 * MINUTE);

        let err = assert_err!(backtester(closes).run(&request));
        assert!(err.is_insufficient_data());
        match err {
            EngineError::InsufficientData { required, available } => {
                assert_eq!(required, 50);
                assert_eq!(available, 30);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_window_rejected() {
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 10, 10);
        let err = backtester(rising(100)).run(&request).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_cancel_running_backtest() {
        let (release, gate) = mpsc::channel();
        let market = GatedMarket {
            inner: SeriesMarket { closes: rising(400) },
            gate: Mutex::new(gate),
        };
        let bt = Arc::new(Backtester::new(Arc::new(market), BacktestSettings::default()));
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, i64::MAX).with_id("job-1");
        assert!(!bt.cancel("job-1"));

        let worker = {
            let bt = Arc::clone(&bt);
            std::thread::spawn(move || bt.run(&request))
        };
        while !bt.is_running("job-1") {
            std::thread::yield_now();
        }
        assert!(bt.cancel("job-1"));
        release.send(()).unwrap();

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(!bt.is_running("job-1"));
    }

    #[test]
    fn test_duplicate_run_id_rejected() {
        let (release, gate) = mpsc::channel();
        let market = GatedMarket {
            inner: SeriesMarket { closes: rising(400) },
            gate: Mutex::new(gate),
        };
        let bt = Arc::new(Backtester::new(Arc::new(market), BacktestSettings::default()));
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, i64::MAX).with_id("job-2");

        let worker = {
            let bt = Arc::clone(&bt);
            let request = request.clone();
            std::thread::spawn(move || bt.run(&request))
        };
        while !bt.is_running("job-2") {
            std::thread::yield_now();
        }

        let err = bt.run_on_candles(&request, candles(&rising(80))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        // The first run still owns its flag.
        assert!(bt.cancel("job-2"));
        release.send(()).unwrap();
        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(!bt.is_running("job-2"));
    }

    #[test]
    fn test_deadline_covers_tick_loading() {
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, i64::MAX);
        let err = slow_backtester(1_200).run(&request).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_execute_bounds_slow_load() {
        let bt = Arc::new(slow_backtester(2_500));
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, i64::MAX).with_id("slow-1");

        let started = Instant::now();
        let err = bt.execute(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_execute_returns_result() {
        let bt = Arc::new(backtester(rising(80)));
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, i64::MAX);
        let result = assert_ok!(bt.execute(request).await);
        assert_eq!(result.candle_count, 80);
        assert!(!bt.is_running(&result.id));
    }

    #[test]
    fn test_result_id_follows_request_id() {
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, i64::MAX).with_id("run-7");
        let result = backtester(Vec::new()).run_on_candles(&request, candles(&rising(80))).unwrap();
        assert_eq!(result.id, "run-7");
    }

    #[test]
    fn test_deadline_aborts_long_runs() {
        let settings = BacktestSettings {
            max_runtime_secs: 0,
            ..BacktestSettings::default()
        };
        let bt = Backtester::new(Arc::new(SeriesMarket { closes: Vec::new() }), settings);
        let request = BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, 1);
        let err = bt.run_on_candles(&request, candles(&rising(600))).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }
}

// =============================================================================
// Accounting
// =============================================================================

mod accounting_tests {
    use super::*;

    fn cross_request() -> BacktestRequest {
        let strategy = Strategy::new("ma-cross", "BTC", Direction::Long, Timeframe::OneMinute)
            .with_indicator(IndicatorConfig::new("fast", IndicatorKind::Ema).with_param("period", 5.0))
            .with_indicator(IndicatorConfig::new("slow", IndicatorKind::Sma).with_param("period", 20.0))
            .with_condition(Condition::against_source(
                "enter",
                "indicator_fast",
                ConditionOperator::CrossesAbove,
                "indicator_slow",
            ));
        BacktestRequest::new(strategy, "BTC-TEST", 0, i64::MAX).with_exit_conditions(
            ConditionLogic::All,
            vec![Condition::against_source(
                "exit",
                "indicator_fast",
                ConditionOperator::CrossesBelow,
                "indicator_slow",
            )],
        )
    }

    #[test]
    fn test_balance_conservation_on_random_walks() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut total_trades = 0;

        for _ in 0..25 {
            let mut price: f64 = 50.0;
            let closes: Vec<f64> = (0..400)
                .map(|_| {
                    price = (price + rng.gen_range(-2.5..2.5)).clamp(2.0, 98.0);
                    price
                })
                .collect();

            let result = backtester(Vec::new())
                .run_on_candles(&cross_request(), candles(&closes))
                .unwrap();

            let expected = result.trades.iter().fold(result.initial_balance, |b, t| b + t.pnl);
            assert_eq!(result.final_balance, expected);
            assert_eq!(result.metrics.total_trades as usize, result.trades.len());
            assert_eq!(
                result.metrics.winning_trades + result.metrics.losing_trades,
                result.metrics.total_trades
            );
            assert!(result.metrics.max_drawdown >= 0.0);
            assert!(result.equity_curve.len() <= 1_000);

            for pair in result.trades.windows(2) {
                assert!(pair[0].exit_time <= pair[1].entry_time);
            }
            if let Some(last) = result.trades.last() {
                if last.exit_reason == ExitReason::EndOfData {
                    assert_eq!(last.exit_time, 399 * MINUTE);
                }
            }
            total_trades += result.trades.len();
        }
        assert!(total_trades > 0);
    }

    #[test]
    fn test_fractional_sizing() {
        let result = backtester(Vec::new())
            .run_on_candles(
                &BacktestRequest::new(above_sma_strategy(), "BTC-TEST", 0, i64::MAX),
                candles(&rising(60)),
            )
            .unwrap();

        let first = &result.trades[0];
        // 10% of 10,000 at 45 cents per share.
        assert_eq!(first.entry_price, 45.0);
        assert_eq!(first.shares, 2_222);
    }
}
