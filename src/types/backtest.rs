use super::market::Direction;
use super::strategy::{Condition, ConditionLogic, Strategy};
use serde::{Deserialize, Serialize};

fn default_initial_balance() -> f64 {
    10_000.0
}

/// Input for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    /// Caller-chosen run id, used for cancellation and as the result id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub strategy: Strategy,
    /// Market identifier ticks are loaded for.
    pub market: String,
    /// Window start (ms, inclusive).
    pub start_time: i64,
    /// Window end (ms, exclusive).
    pub end_time: i64,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    /// Fixed share count per entry; sized from balance when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_shares: Option<u32>,
    /// Separate exit conditions. When absent the strategy's own condition set
    /// closes a held position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub exit_logic: ConditionLogic,
}

impl BacktestRequest {
    pub fn new(strategy: Strategy, market: &str, start_time: i64, end_time: i64) -> Self {
        Self {
            id: None,
            strategy,
            market: market.to_string(),
            start_time,
            end_time,
            initial_balance: default_initial_balance(),
            fixed_shares: None,
            exit_conditions: None,
            exit_logic: ConditionLogic::All,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_initial_balance(mut self, balance: f64) -> Self {
        self.initial_balance = balance;
        self
    }

    pub fn with_fixed_shares(mut self, shares: u32) -> Self {
        self.fixed_shares = Some(shares);
        self
    }

    pub fn with_exit_conditions(mut self, logic: ConditionLogic, conditions: Vec<Condition>) -> Self {
        self.exit_logic = logic;
        self.exit_conditions = Some(conditions);
        self
    }
}

/// Why a simulated position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    EndOfData,
}

/// A closed simulated trade. Prices are in cents, PnL in balance currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestTrade {
    pub direction: Direction,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: u32,
    pub pnl: f64,
    /// PnL relative to the entry cost, in percent.
    pub pnl_pct: f64,
    pub exit_reason: ExitReason,
}

impl BacktestTrade {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    /// Capital committed at entry.
    pub fn entry_cost(&self) -> f64 {
        self.entry_price / 100.0 * self.shares as f64
    }
}

/// Aggregate statistics of a backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestMetrics {
    /// Final balance minus initial balance.
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    /// Sum of closed-trade PnL.
    pub realized_pnl: f64,
    pub realized_pnl_pct: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate_pct: f64,
    pub avg_win: f64,
    /// Magnitude of the average losing trade.
    pub avg_loss: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
}

/// Balance snapshot on the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub timestamp: i64,
    /// Balance plus unrealized PnL.
    pub equity: f64,
    pub balance: f64,
}

/// Outcome of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub id: String,
    pub strategy_id: String,
    pub market: String,
    pub start_time: i64,
    pub end_time: i64,
    pub candle_count: usize,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trades: Vec<BacktestTrade>,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
}
