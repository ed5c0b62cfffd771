//! Condition evaluation.
//!
//! Strategies are compiled once into [`CompiledStrategy`], which resolves
//! every source string into a [`Source`] and validates operands. Evaluation
//! then runs against a [`SeriesFrame`] at a given bar index.

mod frame;
mod source;

pub use frame::SeriesFrame;
pub use source::{Operand, PriceField, Source};

use crate::error::{EngineError, Result};
use crate::types::{
    Condition, ConditionLogic, ConditionOperator, IndicatorConfig, Strategy, Timeframe,
};
use tracing::warn;

/// Tolerance for `==`.
pub const EQUALITY_EPSILON: f64 = 1e-4;

/// A validated condition ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    pub id: String,
    pub source: Source,
    pub operator: ConditionOperator,
    /// Right-hand operand; the lower bound for `between`.
    pub operand: Operand,
    /// Upper bound for `between`.
    pub upper: Option<f64>,
    pub description: String,
}

impl CompiledCondition {
    pub fn compile(condition: &Condition, indicators: &[IndicatorConfig]) -> Result<Self> {
        let invalid = |msg: &str| EngineError::InvalidStrategy(format!("condition {}: {}", condition.id, msg));

        let source = Source::parse(&condition.source_a, indicators)?;

        let (operand, upper) = if condition.operator == ConditionOperator::Between {
            let (Some(a), Some(b)) = (condition.value, condition.value2) else {
                return Err(invalid("between needs value and value2"));
            };
            (Operand::Constant(a.min(b)), Some(a.max(b)))
        } else {
            let source_b = condition
                .source_b
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("value"));
            match (source_b, condition.value) {
                (Some(b), _) => (Operand::Source(Source::parse(b, indicators)?), None),
                (None, Some(v)) => (Operand::Constant(v), None),
                (None, None) => return Err(invalid("missing comparison value")),
            }
        };

        for id in [source.indicator_id(), operand_indicator(&operand)].into_iter().flatten() {
            if let Some(config) = indicators.iter().find(|i| i.id == id) {
                if !config.use_in_conditions {
                    return Err(invalid(&format!("indicator {} is not enabled for conditions", id)));
                }
            }
        }

        let description = match (condition.operator, upper) {
            (ConditionOperator::Between, Some(high)) => format!(
                "{} between {} and {}",
                source.describe(indicators),
                operand.describe(indicators),
                crate::types::format_number(high)
            ),
            (op, _) => format!(
                "{} {} {}",
                source.describe(indicators),
                op,
                operand.describe(indicators)
            ),
        };

        Ok(Self {
            id: condition.id.clone(),
            source,
            operator: condition.operator,
            operand,
            upper,
            description,
        })
    }

    /// Evaluate at bar `index`. Missing values make the condition false.
    pub fn evaluate(&self, frame: &SeriesFrame, index: usize) -> bool {
        let rhs = |i: usize| match &self.operand {
            Operand::Constant(v) => Some(*v),
            Operand::Source(source) => frame.value(source, i),
        };

        if self.operator.is_cross() {
            let Some(prev) = index.checked_sub(1) else {
                return false;
            };
            let above = self.operator == ConditionOperator::CrossesAbove;
            return match (
                frame.value(&self.source, prev),
                rhs(prev),
                frame.value(&self.source, index),
                rhs(index),
            ) {
                (Some(pa), Some(pb), Some(a), Some(b)) => crossed(pa, pb, a, b, above),
                _ => false,
            };
        }

        match self.operator {
            ConditionOperator::Between => match (frame.value(&self.source, index), rhs(index), self.upper) {
                (Some(a), Some(low), Some(high)) => a >= low && a <= high,
                _ => false,
            },
            ConditionOperator::Unsupported => {
                warn!(condition = %self.id, "Unsupported condition operator, treating as false");
                false
            }
            op => match (frame.value(&self.source, index), rhs(index)) {
                (Some(a), Some(b)) => compare(op, a, b),
                _ => false,
            },
        }
    }
}

fn operand_indicator(operand: &Operand) -> Option<&str> {
    match operand {
        Operand::Source(source) => source.indicator_id(),
        Operand::Constant(_) => None,
    }
}

/// Point comparison for the non-cross operators.
pub fn compare(op: ConditionOperator, a: f64, b: f64) -> bool {
    match op {
        ConditionOperator::GreaterThan => a > b,
        ConditionOperator::LessThan => a < b,
        ConditionOperator::GreaterOrEqual => a >= b,
        ConditionOperator::LessOrEqual => a <= b,
        ConditionOperator::Equal => (a - b).abs() < EQUALITY_EPSILON,
        _ => false,
    }
}

/// Strict sign change of `a - b` between two bars.
///
/// Above: `a` was at or below `b` and is now strictly above. Below mirrors it.
pub fn crossed(prev_a: f64, prev_b: f64, a: f64, b: f64, above: bool) -> bool {
    if above {
        prev_a <= prev_b && a > b
    } else {
        prev_a >= prev_b && a < b
    }
}

/// Outcome of evaluating a condition set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetOutcome {
    pub satisfied: bool,
    /// Descriptions of the conditions that held.
    pub matched: Vec<String>,
}

/// Combine conditions with all/any logic. An empty set never triggers.
pub fn evaluate_set(
    logic: ConditionLogic,
    conditions: &[CompiledCondition],
    frame: &SeriesFrame,
    index: usize,
) -> SetOutcome {
    if conditions.is_empty() {
        return SetOutcome::default();
    }

    let matched: Vec<String> = conditions
        .iter()
        .filter(|c| c.evaluate(frame, index))
        .map(|c| c.description.clone())
        .collect();

    let satisfied = match logic {
        ConditionLogic::All => matched.len() == conditions.len(),
        ConditionLogic::Any => !matched.is_empty(),
    };

    SetOutcome {
        satisfied,
        matched: if satisfied { matched } else { Vec::new() },
    }
}

/// Indicator with its timeframe resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIndicator {
    pub config: IndicatorConfig,
    pub timeframe: Timeframe,
}

/// A strategy validated for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    pub strategy: Strategy,
    /// Indicators enabled for conditions.
    pub indicators: Vec<ResolvedIndicator>,
    pub conditions: Vec<CompiledCondition>,
}

impl CompiledStrategy {
    pub fn compile(strategy: &Strategy) -> Result<Self> {
        let mut indicators = Vec::new();
        for config in strategy.indicators.iter().filter(|i| i.use_in_conditions) {
            indicators.push(ResolvedIndicator {
                config: config.clone(),
                timeframe: resolve_timeframe(&config.timeframe, strategy.timeframe).ok_or_else(|| {
                    EngineError::InvalidStrategy(format!(
                        "indicator {}: unknown timeframe '{}'",
                        config.id, config.timeframe
                    ))
                })?,
            });
        }

        let conditions = compile_conditions(&strategy.conditions, &strategy.indicators)?;

        Ok(Self {
            strategy: strategy.clone(),
            indicators,
            conditions,
        })
    }

    pub fn id(&self) -> &str {
        &self.strategy.id
    }

    pub fn logic(&self) -> ConditionLogic {
        self.strategy.condition_logic
    }

    /// Evaluate the strategy's condition set at bar `index`.
    pub fn evaluate(&self, frame: &SeriesFrame, index: usize) -> SetOutcome {
        evaluate_set(self.logic(), &self.conditions, frame, index)
    }
}

/// Compile a list of conditions against a set of indicators.
pub fn compile_conditions(
    conditions: &[Condition],
    indicators: &[IndicatorConfig],
) -> Result<Vec<CompiledCondition>> {
    conditions
        .iter()
        .map(|c| CompiledCondition::compile(c, indicators))
        .collect()
}

/// `strategy` (or empty) passes the strategy timeframe through.
fn resolve_timeframe(label: &str, strategy_timeframe: Timeframe) -> Option<Timeframe> {
    let label = label.trim();
    if label.is_empty() || label.eq_ignore_ascii_case("strategy") || label.eq_ignore_ascii_case("default") {
        return Some(strategy_timeframe);
    }
    Timeframe::parse(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, Direction, IndicatorKind, IndicatorResult};

    fn frame_with(values: &[Option<f64>]) -> SeriesFrame {
        let candles: Vec<Candle> = (0..values.len())
            .map(|i| Candle::new(i as i64 * 60_000, 50.0))
            .collect();
        let mut frame = SeriesFrame::new(candles);
        frame.insert_indicator(
            "rsi",
            values
                .iter()
                .enumerate()
                .map(|(i, v)| IndicatorResult::scalar(i as i64 * 60_000, *v))
                .collect(),
        );
        frame
    }

    fn strategy() -> Strategy {
        Strategy::new("s1", "BTC", Direction::Long, Timeframe::FifteenMinutes)
            .with_indicator(IndicatorConfig::new("rsi", IndicatorKind::Rsi).with_param("period", 14.0))
    }

    fn compiled(condition: Condition) -> CompiledCondition {
        CompiledCondition::compile(&condition, &strategy().indicators).unwrap()
    }

    #[test]
    fn test_compare_operators() {
        assert!(compare(ConditionOperator::GreaterThan, 2.0, 1.0));
        assert!(!compare(ConditionOperator::GreaterThan, 1.0, 1.0));
        assert!(compare(ConditionOperator::GreaterOrEqual, 1.0, 1.0));
        assert!(compare(ConditionOperator::LessThan, 0.5, 1.0));
        assert!(compare(ConditionOperator::LessOrEqual, 1.0, 1.0));
        assert!(compare(ConditionOperator::Equal, 1.00005, 1.0));
        assert!(!compare(ConditionOperator::Equal, 1.001, 1.0));
    }

    #[test]
    fn test_crosses_above_and_below() {
        let frame = frame_with(&[Some(65.0), Some(75.0), Some(80.0), Some(60.0)]);
        let above = compiled(Condition::against_value("c", "indicator_rsi", ConditionOperator::CrossesAbove, 70.0));
        let below = compiled(Condition::against_value("c", "indicator_rsi", ConditionOperator::CrossesBelow, 70.0));

        assert!(!above.evaluate(&frame, 0));
        assert!(above.evaluate(&frame, 1));
        assert!(!above.evaluate(&frame, 2));
        assert!(below.evaluate(&frame, 3));
        assert!(!below.evaluate(&frame, 1));
    }

    #[test]
    fn test_cross_from_equal_counts() {
        let frame = frame_with(&[Some(70.0), Some(70.5)]);
        let above = compiled(Condition::against_value("c", "rsi", ConditionOperator::CrossesAbove, 70.0));
        assert!(above.evaluate(&frame, 1));
    }

    #[test]
    fn test_cross_missing_value_is_false() {
        let frame = frame_with(&[None, Some(75.0)]);
        let above = compiled(Condition::against_value("c", "rsi", ConditionOperator::CrossesAbove, 70.0));
        assert!(!above.evaluate(&frame, 1));
    }

    #[test]
    fn test_between_inclusive_and_normalized() {
        let frame = frame_with(&[Some(30.0), Some(70.0), Some(71.0)]);
        let between = compiled(Condition::between("c", "rsi", 70.0, 30.0));

        assert!(between.evaluate(&frame, 0));
        assert!(between.evaluate(&frame, 1));
        assert!(!between.evaluate(&frame, 2));
        assert_eq!(between.description, "RSI(14) between 30 and 70");
    }

    #[test]
    fn test_source_vs_source() {
        let frame = frame_with(&[Some(40.0), Some(60.0)]);
        let cond = compiled(Condition::against_source("c", "rsi", ConditionOperator::GreaterThan, "close"));
        assert!(!cond.evaluate(&frame, 0));
        assert!(cond.evaluate(&frame, 1));
        assert_eq!(cond.description, "RSI(14) > Close");
    }

    #[test]
    fn test_unsupported_operator_is_false() {
        let frame = frame_with(&[Some(40.0)]);
        let cond = compiled(Condition::against_value("c", "rsi", ConditionOperator::Unsupported, 10.0));
        assert!(!cond.evaluate(&frame, 0));
    }

    #[test]
    fn test_missing_value_fails_compile() {
        let condition = Condition {
            id: "c".into(),
            source_a: "rsi".into(),
            operator: ConditionOperator::GreaterThan,
            source_b: None,
            value: None,
            value2: None,
        };
        assert!(CompiledCondition::compile(&condition, &strategy().indicators).is_err());
    }

    #[test]
    fn test_set_logic() {
        let frame = frame_with(&[Some(60.0)]);
        let gt = compiled(Condition::against_value("a", "rsi", ConditionOperator::GreaterThan, 50.0));
        let lt = compiled(Condition::against_value("b", "rsi", ConditionOperator::LessThan, 50.0));
        let both = vec![gt.clone(), lt];

        assert!(!evaluate_set(ConditionLogic::All, &both, &frame, 0).satisfied);
        let any = evaluate_set(ConditionLogic::Any, &both, &frame, 0);
        assert!(any.satisfied);
        assert_eq!(any.matched, vec![gt.description.clone()]);
        assert!(!evaluate_set(ConditionLogic::All, &[], &frame, 0).satisfied);
        assert!(!evaluate_set(ConditionLogic::Any, &[], &frame, 0).satisfied);
    }

    #[test]
    fn test_compile_strategy_resolves_timeframes() {
        let strategy = strategy()
            .with_indicator(IndicatorConfig::new("ema", IndicatorKind::Ema).with_timeframe("1h"))
            .with_condition(Condition::against_value("c", "rsi", ConditionOperator::GreaterThan, 50.0));
        let compiled = CompiledStrategy::compile(&strategy).unwrap();
        assert_eq!(compiled.indicators[0].timeframe, Timeframe::FifteenMinutes);
        assert_eq!(compiled.indicators[1].timeframe, Timeframe::OneHour);

        let bad = strategy.with_indicator(IndicatorConfig::new("x", IndicatorKind::Sma).with_timeframe("7m"));
        assert!(CompiledStrategy::compile(&bad).is_err());
    }

    #[test]
    fn test_disabled_indicator_rejected() {
        let mut disabled = IndicatorConfig::new("sma", IndicatorKind::Sma);
        disabled.use_in_conditions = false;
        let strategy = strategy()
            .with_indicator(disabled)
            .with_condition(Condition::against_value("c", "sma", ConditionOperator::GreaterThan, 1.0));
        assert!(CompiledStrategy::compile(&strategy).is_err());
    }
}
