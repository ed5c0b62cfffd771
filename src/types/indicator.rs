use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named numeric parameters for an indicator, e.g. `{"period": 14}`.
///
/// A `BTreeMap` keeps keys ordered so the serialized form is canonical and can
/// be used as part of a cache key.
pub type IndicatorParams = BTreeMap<String, f64>;

/// Supported indicator types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    Macd,
    Sma,
    Ema,
    #[serde(alias = "bb", alias = "bollinger_bands")]
    Bollinger,
    #[serde(alias = "stoch")]
    Stochastic,
    Atr,
    Vwap,
    #[serde(alias = "up_percent", alias = "rolling_up")]
    RollingUpPercent,
    /// Any type this engine does not know how to compute.
    #[serde(other)]
    Unsupported,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Bollinger => "bollinger",
            IndicatorKind::Stochastic => "stochastic",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Vwap => "vwap",
            IndicatorKind::RollingUpPercent => "rolling_up_percent",
            IndicatorKind::Unsupported => "unsupported",
        }
    }

    /// Named sub-series this indicator emits in `IndicatorResult::values`.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            IndicatorKind::Macd => &["macd", "signal", "histogram"],
            IndicatorKind::Bollinger => &["upper", "middle", "lower"],
            IndicatorKind::Stochastic => &["k", "d"],
            _ => &[],
        }
    }

    /// Whether `field` names an output of this indicator. `value` always
    /// refers to the primary scalar.
    pub fn has_output(&self, field: &str) -> bool {
        field == "value" || self.outputs().contains(&field)
    }

    /// Conventional parameter order used when displaying a configuration.
    fn param_order(&self) -> &'static [&'static str] {
        match self {
            IndicatorKind::Macd => &[
                "fast", "fastPeriod", "fastLength", "slow", "slowPeriod", "slowLength", "signal",
                "signalPeriod", "signalLength",
            ],
            IndicatorKind::Bollinger => &["period", "length", "stdDev", "mult", "multiplier"],
            IndicatorKind::Stochastic => &[
                "kLength", "kPeriod", "period", "smoothK", "smooth", "dLength", "dPeriod",
            ],
            _ => &[],
        }
    }

    /// Short display label, e.g. `RSI`.
    pub fn label(&self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "RSI",
            IndicatorKind::Macd => "MACD",
            IndicatorKind::Sma => "SMA",
            IndicatorKind::Ema => "EMA",
            IndicatorKind::Bollinger => "BB",
            IndicatorKind::Stochastic => "Stoch",
            IndicatorKind::Atr => "ATR",
            IndicatorKind::Vwap => "VWAP",
            IndicatorKind::RollingUpPercent => "Up%",
            IndicatorKind::Unsupported => "?",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_timeframe() -> String {
    "strategy".to_string()
}

fn default_true() -> bool {
    true
}

/// An indicator configured on a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IndicatorKind,
    /// Timeframe label, or `strategy` to use the strategy's own timeframe.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub parameters: IndicatorParams,
    #[serde(default = "default_true")]
    pub use_in_conditions: bool,
}

impl IndicatorConfig {
    pub fn new(id: &str, kind: IndicatorKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            timeframe: default_timeframe(),
            parameters: IndicatorParams::new(),
            use_in_conditions: true,
        }
    }

    /// Builder-style parameter setter.
    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_timeframe(mut self, timeframe: &str) -> Self {
        self.timeframe = timeframe.to_string();
        self
    }

    /// Display label including parameters, e.g. `RSI(14)`.
    pub fn label(&self) -> String {
        if self.parameters.is_empty() {
            return self.kind.label().to_string();
        }
        let order = self.kind.param_order();
        let mut entries: Vec<(&String, &f64)> = self.parameters.iter().collect();
        entries.sort_by_key(|(name, _)| {
            order
                .iter()
                .position(|o| *o == name.as_str())
                .unwrap_or(usize::MAX)
        });
        let args: Vec<String> = entries.iter().map(|(_, v)| format_number(**v)).collect();
        format!("{}({})", self.kind.label(), args.join(","))
    }
}

/// Canonical string form of a parameter map.
pub fn params_key(params: &IndicatorParams) -> String {
    serde_json::to_string(params).unwrap_or_default()
}

/// Look up the first present parameter among `names`, falling back to `default`.
pub fn param(params: &IndicatorParams, names: &[&str], default: f64) -> f64 {
    names
        .iter()
        .find_map(|name| params.get(*name).copied())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Format a number without a trailing `.0` for whole values.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// One point of an indicator series, aligned to a candle timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult {
    pub timestamp: i64,
    /// Primary scalar; `None` during warm-up.
    pub value: Option<f64>,
    /// Named sub-series for multi-output indicators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, Option<f64>>>,
}

impl IndicatorResult {
    pub fn scalar(timestamp: i64, value: Option<f64>) -> Self {
        Self {
            timestamp,
            value,
            values: None,
        }
    }

    pub fn multi(timestamp: i64, primary: Option<f64>, values: &[(&str, Option<f64>)]) -> Self {
        Self {
            timestamp,
            value: primary,
            values: Some(
                values
                    .iter()
                    .map(|(name, v)| (name.to_string(), *v))
                    .collect(),
            ),
        }
    }

    /// Resolve a sub-field, or the primary value when `field` is `None` or `value`.
    pub fn field(&self, field: Option<&str>) -> Option<f64> {
        match field {
            None | Some("value") => self.value,
            Some(name) => self.values.as_ref()?.get(name).copied().flatten(),
        }
    }

    /// Whether anything in this point is defined.
    pub fn is_defined(&self) -> bool {
        self.value.is_some()
            || self
                .values
                .as_ref()
                .map(|m| m.values().any(|v| v.is_some()))
                .unwrap_or(false)
    }
}
