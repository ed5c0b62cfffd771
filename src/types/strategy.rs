use super::indicator::IndicatorConfig;
use super::market::{Direction, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = ">", alias = "gt", alias = "greater_than")]
    GreaterThan,
    #[serde(rename = "<", alias = "lt", alias = "less_than")]
    LessThan,
    #[serde(rename = ">=", alias = "gte")]
    GreaterOrEqual,
    #[serde(rename = "<=", alias = "lte")]
    LessOrEqual,
    #[serde(rename = "==", alias = "=", alias = "eq", alias = "equals")]
    Equal,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "crosses_above", alias = "cross_above")]
    CrossesAbove,
    #[serde(rename = "crosses_below", alias = "cross_below")]
    CrossesBelow,
    /// Anything else; evaluates to false.
    #[serde(other)]
    Unsupported,
}

impl ConditionOperator {
    pub fn is_cross(&self) -> bool {
        matches!(self, ConditionOperator::CrossesAbove | ConditionOperator::CrossesBelow)
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionOperator::GreaterThan => ">",
            ConditionOperator::LessThan => "<",
            ConditionOperator::GreaterOrEqual => ">=",
            ConditionOperator::LessOrEqual => "<=",
            ConditionOperator::Equal => "==",
            ConditionOperator::Between => "between",
            ConditionOperator::CrossesAbove => "crosses above",
            ConditionOperator::CrossesBelow => "crosses below",
            ConditionOperator::Unsupported => "??",
        };
        f.write_str(s)
    }
}

/// How condition results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionLogic {
    #[default]
    #[serde(alias = "and")]
    All,
    #[serde(alias = "or")]
    Any,
}

/// A single comparison between a source and another source or constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub id: String,
    pub source_a: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<f64>,
}

impl Condition {
    /// Compare a source against a constant.
    pub fn against_value(id: &str, source_a: &str, operator: ConditionOperator, value: f64) -> Self {
        Self {
            id: id.to_string(),
            source_a: source_a.to_string(),
            operator,
            source_b: None,
            value: Some(value),
            value2: None,
        }
    }

    /// Compare two sources.
    pub fn against_source(id: &str, source_a: &str, operator: ConditionOperator, source_b: &str) -> Self {
        Self {
            id: id.to_string(),
            source_a: source_a.to_string(),
            operator,
            source_b: Some(source_b.to_string()),
            value: None,
            value2: None,
        }
    }

    /// Inclusive range check.
    pub fn between(id: &str, source_a: &str, low: f64, high: f64) -> Self {
        Self {
            id: id.to_string(),
            source_a: source_a.to_string(),
            operator: ConditionOperator::Between,
            source_b: None,
            value: Some(low),
            value2: Some(high),
        }
    }
}

/// A user-defined strategy, owned by an external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub asset: String,
    #[serde(default)]
    pub direction: Direction,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub is_active: bool,
}

impl Strategy {
    pub fn new(id: &str, asset: &str, direction: Direction, timeframe: Timeframe) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            asset: asset.to_string(),
            direction,
            timeframe,
            indicators: Vec::new(),
            condition_logic: ConditionLogic::All,
            conditions: Vec::new(),
            is_active: true,
        }
    }

    pub fn with_indicator(mut self, indicator: IndicatorConfig) -> Self {
        self.indicators.push(indicator);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_logic(mut self, logic: ConditionLogic) -> Self {
        self.condition_logic = logic;
        self
    }

    pub fn indicator(&self, id: &str) -> Option<&IndicatorConfig> {
        self.indicators.iter().find(|i| i.id == id)
    }
}

/// Event emitted when a strategy's condition set is satisfied in a live cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyTrigger {
    pub strategy_id: String,
    pub market: String,
    /// Human-readable descriptions of the satisfied conditions.
    pub triggered_conditions: Vec<String>,
    /// Latest value of every indicator used; multi-output indicators report `id.field`.
    pub indicator_values: BTreeMap<String, Option<f64>>,
    /// Start of the candle the conditions were evaluated on.
    pub candle_timestamp: i64,
    pub timestamp: i64,
}

/// When a strategy whose conditions stay true is allowed to fire again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Fire on every cycle the condition set holds.
    #[default]
    EveryCycle,
    /// Fire only when the condition set goes from false to true.
    Edge,
    /// Fire at most once per cooldown window.
    Cooldown { secs: u64 },
}

impl TriggerPolicy {
    /// Parse `every_cycle`, `edge` or `cooldown:<secs>`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "every_cycle" | "always" => Some(TriggerPolicy::EveryCycle),
            "edge" | "on_edge" => Some(TriggerPolicy::Edge),
            _ => s
                .strip_prefix("cooldown:")
                .and_then(|secs| secs.parse().ok())
                .map(|secs| TriggerPolicy::Cooldown { secs }),
        }
    }
}
