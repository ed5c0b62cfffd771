//! Backtesting Engine
//!
//! Replays historical ticks through the candle builder, indicator library and
//! condition evaluator, simulating entries and exits on one market side.

use super::candles::build_candles;
use super::conditions::{compile_conditions, evaluate_set, CompiledCondition, CompiledStrategy, SeriesFrame};
use super::indicators;
use super::market_data::{call_blocking, MarketDataProvider};
use crate::config::{BacktestSettings, MIN_WARMUP_CANDLES};
use crate::error::{EngineError, Result};
use crate::types::{
    BacktestMetrics, BacktestRequest, BacktestResult, BacktestTrade, Candle, ConditionLogic, Direction,
    EquityPoint, ExitReason,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Profit factor reported when there are winning trades and no losing ones.
pub const PROFIT_FACTOR_SENTINEL: f64 = 999.0;

/// Maximum points kept on the equity curve.
const MAX_EQUITY_POINTS: usize = 1_000;

/// Bars between deadline and cancellation checks.
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// An open simulated position.
#[derive(Debug, Clone)]
struct SimulatedPosition {
    direction: Direction,
    shares: u32,
    entry_price: f64,
    entry_time: i64,
}

impl SimulatedPosition {
    fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) / 100.0 * self.shares as f64
    }

    fn close(self, exit_price: f64, exit_time: i64, exit_reason: ExitReason) -> BacktestTrade {
        let pnl = self.pnl_at(exit_price);
        let pnl_pct = if self.entry_price > 0.0 {
            (exit_price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        };
        BacktestTrade {
            direction: self.direction,
            entry_time: self.entry_time,
            exit_time,
            entry_price: self.entry_price,
            exit_price,
            shares: self.shares,
            pnl,
            pnl_pct,
            exit_reason,
        }
    }
}

/// Balance, open position and drawdown tracking.
///
/// Balance moves only by realized PnL, so the final balance equals the
/// initial balance plus the sum of trade PnL.
#[derive(Debug)]
struct SimulatedPortfolio {
    balance: f64,
    peak_balance: f64,
    max_drawdown: f64,
    max_drawdown_pct: f64,
    position: Option<SimulatedPosition>,
    trades: Vec<BacktestTrade>,
    equity_curve: Vec<EquityPoint>,
}

impl SimulatedPortfolio {
    fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            peak_balance: initial_balance,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    fn open(&mut self, direction: Direction, shares: u32, candle: &Candle) {
        debug!(time = candle.timestamp, price = candle.close, shares, "BUY");
        self.position = Some(SimulatedPosition {
            direction,
            shares,
            entry_price: candle.close,
            entry_time: candle.timestamp,
        });
    }

    fn close(&mut self, candle: &Candle, reason: ExitReason) {
        if let Some(position) = self.position.take() {
            let trade = position.close(candle.close, candle.timestamp, reason);
            debug!(time = candle.timestamp, price = candle.close, pnl = trade.pnl, "SELL");
            self.balance += trade.pnl;
            self.trades.push(trade);
            self.track_drawdown();
        }
    }

    fn track_drawdown(&mut self) {
        if self.balance > self.peak_balance {
            self.peak_balance = self.balance;
        }
        let drawdown = self.peak_balance - self.balance;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            self.max_drawdown_pct = if self.peak_balance > 0.0 {
                drawdown / self.peak_balance * 100.0
            } else {
                0.0
            };
        }
    }

    fn mark(&mut self, candle: &Candle) {
        let unrealized = self
            .position
            .as_ref()
            .map(|p| p.pnl_at(candle.close))
            .unwrap_or(0.0);
        self.equity_curve.push(EquityPoint {
            timestamp: candle.timestamp,
            equity: self.balance + unrealized,
            balance: self.balance,
        });
    }
}

/// Runs backtests against a market data source.
pub struct Backtester {
    market_data: Arc<dyn MarketDataProvider>,
    settings: BacktestSettings,
    /// Run id -> still allowed to run.
    running: DashMap<String, bool>,
}

impl Backtester {
    pub fn new(market_data: Arc<dyn MarketDataProvider>, settings: BacktestSettings) -> Self {
        Self {
            market_data,
            settings,
            running: DashMap::new(),
        }
    }

    /// Request cancellation of a running backtest. Returns false when no run
    /// with that id is in progress.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.running.get_mut(run_id) {
            Some(mut flag) => {
                *flag = false;
                info!(run_id = %run_id, "Backtest cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.running.contains_key(run_id)
    }

    fn is_cancelled(&self, run_id: &str) -> bool {
        self.running.get(run_id).map(|flag| !*flag).unwrap_or(false)
    }

    /// Claim a run id. An id already in flight is rejected so that each run
    /// owns its cancellation flag.
    fn register(&self, request: &BacktestRequest) -> Result<String> {
        let run_id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        match self.running.entry(run_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::InvalidRequest(format!(
                "backtest {} is already running",
                run_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(true);
                Ok(run_id)
            }
        }
    }

    /// Load ticks for the requested window, build candles and simulate.
    pub fn run(&self, request: &BacktestRequest) -> Result<BacktestResult> {
        let deadline = Instant::now() + self.settings.max_runtime();
        validate(request)?;
        let run_id = self.register(request)?;
        let result = self.load_and_simulate(&run_id, request, deadline);
        self.running.remove(&run_id);
        result
    }

    /// [`Self::run`] on the blocking pool. The whole run, tick loading
    /// included, is bounded by the configured max runtime; on expiry the run
    /// is cancelled and `Timeout` returned.
    pub async fn execute(self: &Arc<Self>, mut request: BacktestRequest) -> Result<BacktestResult> {
        let run_id = request
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let backtester = Arc::clone(self);
        let result = call_blocking("backtest", self.settings.max_runtime(), move || backtester.run(&request)).await;
        if matches!(result, Err(EngineError::Timeout(_))) {
            self.cancel(&run_id);
        }
        result
    }

    fn load_and_simulate(
        &self,
        run_id: &str,
        request: &BacktestRequest,
        deadline: Instant,
    ) -> Result<BacktestResult> {
        let ticks = self
            .market_data
            .load_ticks(&request.market, request.start_time, request.end_time)?;
        self.check_deadline(request, deadline)?;
        let candles = build_candles(&ticks, request.strategy.timeframe, request.strategy.direction);
        info!(
            strategy_id = %request.strategy.id,
            market = %request.market,
            ticks = ticks.len(),
            candles = candles.len(),
            "Starting backtest"
        );
        self.simulate(run_id, request, candles, deadline)
    }

    /// Simulate over prebuilt candles of the strategy's timeframe.
    pub fn run_on_candles(&self, request: &BacktestRequest, candles: Vec<Candle>) -> Result<BacktestResult> {
        let deadline = Instant::now() + self.settings.max_runtime();
        validate(request)?;
        let run_id = self.register(request)?;
        let result = self.simulate(&run_id, request, candles, deadline);
        self.running.remove(&run_id);
        result
    }

    fn check_deadline(&self, request: &BacktestRequest, deadline: Instant) -> Result<()> {
        if Instant::now() > deadline {
            return Err(EngineError::Timeout(format!(
                "backtest of {} exceeded {}s",
                request.strategy.id, self.settings.max_runtime_secs
            )));
        }
        Ok(())
    }

    fn simulate(
        &self,
        run_id: &str,
        request: &BacktestRequest,
        candles: Vec<Candle>,
        deadline: Instant,
    ) -> Result<BacktestResult> {
        let warmup = self.settings.warmup_candles.max(MIN_WARMUP_CANDLES);
        if candles.len() < warmup {
            return Err(EngineError::InsufficientData {
                required: warmup,
                available: candles.len(),
            });
        }

        let strategy = CompiledStrategy::compile(&request.strategy)?;
        let exit_conditions = request
            .exit_conditions
            .as_ref()
            .map(|conditions| compile_conditions(conditions, &request.strategy.indicators))
            .transpose()?;

        let mut frame = SeriesFrame::new(candles);
        for indicator in &strategy.indicators {
            if indicator.timeframe != request.strategy.timeframe {
                debug!(
                    indicator = %indicator.config.id,
                    timeframe = %indicator.timeframe,
                    "Backtest evaluates indicator on the strategy timeframe"
                );
            }
            let series = indicators::compute_config(&indicator.config, frame.candles());
            frame.insert_indicator(&indicator.config.id, series);
        }

        self.check_deadline(request, deadline)?;
        let mut portfolio = SimulatedPortfolio::new(request.initial_balance);

        for i in warmup..frame.len() {
            if i % DEADLINE_CHECK_INTERVAL == 0 {
                if self.is_cancelled(run_id) {
                    info!(run_id = %run_id, "Backtest cancelled");
                    return Err(EngineError::Cancelled);
                }
                self.check_deadline(request, deadline)?;
            }

            let Some(candle) = frame.candle(i).copied() else {
                break;
            };

            if portfolio.position.is_some() {
                if self.exit_signal(&strategy, exit_conditions.as_deref(), request.exit_logic, &frame, i) {
                    portfolio.close(&candle, ExitReason::Signal);
                }
            } else if strategy.evaluate(&frame, i).satisfied {
                let shares = self.position_size(request, portfolio.balance, candle.close);
                if shares > 0 {
                    portfolio.open(request.strategy.direction, shares, &candle);
                } else {
                    debug!(time = candle.timestamp, "Entry signal skipped, position size is zero");
                }
            }

            portfolio.mark(&candle);
        }

        if let Some(last) = frame.candles().last().copied() {
            portfolio.close(&last, ExitReason::EndOfData);
        }

        let metrics = calculate_metrics(
            &portfolio.trades,
            request.initial_balance,
            portfolio.balance,
            portfolio.max_drawdown,
            portfolio.max_drawdown_pct,
            self.settings.annualization_factor,
        );

        info!(
            strategy_id = %request.strategy.id,
            trades = metrics.total_trades,
            pnl = metrics.total_pnl,
            win_rate = metrics.win_rate_pct,
            "Backtest complete"
        );

        Ok(BacktestResult {
            id: run_id.to_string(),
            strategy_id: request.strategy.id.clone(),
            market: request.market.clone(),
            start_time: request.start_time,
            end_time: request.end_time,
            candle_count: frame.len(),
            initial_balance: request.initial_balance,
            final_balance: portfolio.balance,
            trades: portfolio.trades,
            metrics,
            equity_curve: sample_equity_curve(portfolio.equity_curve, MAX_EQUITY_POINTS),
        })
    }

    fn exit_signal(
        &self,
        strategy: &CompiledStrategy,
        exit_conditions: Option<&[CompiledCondition]>,
        exit_logic: ConditionLogic,
        frame: &SeriesFrame,
        index: usize,
    ) -> bool {
        match exit_conditions {
            Some(conditions) => evaluate_set(exit_logic, conditions, frame, index).satisfied,
            None => strategy.evaluate(frame, index).satisfied,
        }
    }

    /// Fixed share count, or the configured fraction of balance at `price` cents.
    fn position_size(&self, request: &BacktestRequest, balance: f64, price: f64) -> u32 {
        if let Some(shares) = request.fixed_shares {
            return shares;
        }
        if price <= 0.0 || balance <= 0.0 {
            return 0;
        }
        let shares = (self.settings.position_fraction * balance / (price / 100.0)).floor();
        if shares >= u32::MAX as f64 {
            u32::MAX
        } else {
            shares as u32
        }
    }
}

fn validate(request: &BacktestRequest) -> Result<()> {
    if request.end_time <= request.start_time {
        return Err(EngineError::InvalidRequest("end time must be after start time".to_string()));
    }
    if request.initial_balance.is_nan() || request.initial_balance <= 0.0 {
        return Err(EngineError::InvalidRequest("initial balance must be positive".to_string()));
    }
    if request.fixed_shares == Some(0) {
        return Err(EngineError::InvalidRequest("fixed share count must be positive".to_string()));
    }
    Ok(())
}

/// Aggregate trade statistics.
pub fn calculate_metrics(
    trades: &[BacktestTrade],
    initial_balance: f64,
    final_balance: f64,
    max_drawdown: f64,
    max_drawdown_pct: f64,
    annualization_factor: f64,
) -> BacktestMetrics {
    let total_pnl = final_balance - initial_balance;
    let realized_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let pct = |v: f64| if initial_balance != 0.0 { v / initial_balance * 100.0 } else { 0.0 };

    let total_trades = trades.len() as u32;
    let winning_trades = trades.iter().filter(|t| t.is_winner()).count() as u32;
    let losing_trades = total_trades - winning_trades;
    let win_rate_pct = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        PROFIT_FACTOR_SENTINEL
    } else {
        0.0
    };

    let avg_win = if winning_trades > 0 {
        gross_profit / winning_trades as f64
    } else {
        0.0
    };
    let avg_loss = if losing_trades > 0 {
        gross_loss / losing_trades as f64
    } else {
        0.0
    };

    let returns: Vec<f64> = trades
        .iter()
        .filter(|t| t.entry_cost() > 0.0)
        .map(|t| t.pnl / t.entry_cost())
        .collect();

    BacktestMetrics {
        total_pnl,
        total_pnl_pct: pct(total_pnl),
        realized_pnl,
        realized_pnl_pct: pct(realized_pnl),
        total_trades,
        winning_trades,
        losing_trades,
        win_rate_pct,
        avg_win,
        avg_loss,
        gross_profit,
        gross_loss,
        profit_factor,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio: sharpe_ratio(&returns, annualization_factor),
    }
}

/// Mean over sample standard deviation of per-trade returns, scaled by
/// `sqrt(annualization_factor)`. Zero with fewer than two returns or no variance.
pub fn sharpe_ratio(returns: &[f64], annualization_factor: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev * annualization_factor.max(0.0).sqrt()
    } else {
        0.0
    }
}

/// Downsample to at most `max_points`, always keeping the last point.
fn sample_equity_curve(curve: Vec<EquityPoint>, max_points: usize) -> Vec<EquityPoint> {
    if curve.len() <= max_points || max_points < 2 {
        return curve;
    }
    let step = (curve.len() + max_points - 2) / (max_points - 1);
    let last = curve.last().copied();
    let mut sampled: Vec<EquityPoint> = curve.into_iter().step_by(step).collect();
    if let Some(last) = last {
        if sampled.last().map(|p| p.timestamp) != Some(last.timestamp) {
            sampled.push(last);
        }
    }
    sampled
}
