//! Condition operands resolved from their configured string form.

use crate::error::{EngineError, Result};
use crate::types::{format_number, Candle, IndicatorConfig, IndicatorKind};
use std::fmt;

/// Candle field usable as a condition source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
}

impl PriceField {
    fn parse(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        let name = lower
            .strip_prefix("price_")
            .or_else(|| lower.strip_prefix("price."))
            .unwrap_or(&lower);
        match name {
            "open" => Some(PriceField::Open),
            "high" => Some(PriceField::High),
            "low" => Some(PriceField::Low),
            "close" | "price" => Some(PriceField::Close),
            _ => None,
        }
    }

    pub fn of(&self, candle: &Candle) -> f64 {
        match self {
            PriceField::Open => candle.open,
            PriceField::High => candle.high,
            PriceField::Low => candle.low,
            PriceField::Close => candle.close,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PriceField::Open => "Open",
            PriceField::High => "High",
            PriceField::Low => "Low",
            PriceField::Close => "Close",
        }
    }
}

/// A resolved series reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Price(PriceField),
    /// Output of a configured indicator; `field` selects a sub-series.
    Indicator { id: String, field: Option<String> },
}

impl Source {
    /// Resolve a configured source string against a strategy's indicators.
    ///
    /// Accepts price fields (`close`, `Close`, `price_close`, `price`),
    /// `indicator_<id>[.<field>]`, and `<id>[.<field>]` for a configured id.
    pub fn parse(raw: &str, indicators: &[IndicatorConfig]) -> Result<Self> {
        let trimmed = raw.trim();
        if let Some(field) = PriceField::parse(trimmed) {
            return Ok(Source::Price(field));
        }

        let reference = trimmed.strip_prefix("indicator_").unwrap_or(trimmed);
        let (id, field) = match reference.split_once('.') {
            Some((id, field)) => (id, Some(field)),
            None => (reference, None),
        };

        let config = indicators
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| EngineError::InvalidStrategy(format!("unknown source '{}'", raw)))?;

        let field = match field {
            None | Some("value") | Some("") => None,
            Some(f) if config.kind == IndicatorKind::Unsupported || config.kind.has_output(f) => {
                Some(f.to_string())
            }
            Some(f) => {
                return Err(EngineError::InvalidStrategy(format!(
                    "{} has no output '{}'",
                    config.kind, f
                )))
            }
        };

        Ok(Source::Indicator {
            id: id.to_string(),
            field,
        })
    }

    pub fn indicator_id(&self) -> Option<&str> {
        match self {
            Source::Indicator { id, .. } => Some(id),
            Source::Price(_) => None,
        }
    }

    /// Human-readable label, e.g. `Close` or `MACD(12,26,9).signal`.
    pub fn describe(&self, indicators: &[IndicatorConfig]) -> String {
        match self {
            Source::Price(field) => field.label().to_string(),
            Source::Indicator { id, field } => {
                let base = indicators
                    .iter()
                    .find(|i| &i.id == id)
                    .map(|i| i.label())
                    .unwrap_or_else(|| id.clone());
                match field {
                    Some(f) => format!("{}.{}", base, f),
                    None => base,
                }
            }
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Source(Source),
    Constant(f64),
}

impl Operand {
    pub fn describe(&self, indicators: &[IndicatorConfig]) -> String {
        match self {
            Operand::Source(source) => source.describe(indicators),
            Operand::Constant(v) => format_number(*v),
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicators() -> Vec<IndicatorConfig> {
        vec![
            IndicatorConfig::new("rsi14", IndicatorKind::Rsi).with_param("period", 14.0),
            IndicatorConfig::new("macd", IndicatorKind::Macd),
        ]
    }

    #[test]
    fn test_parse_price_fields() {
        let ind = indicators();
        assert_eq!(Source::parse("Close", &ind).unwrap(), Source::Price(PriceField::Close));
        assert_eq!(Source::parse("price_high", &ind).unwrap(), Source::Price(PriceField::High));
        assert_eq!(Source::parse("price", &ind).unwrap(), Source::Price(PriceField::Close));
    }

    #[test]
    fn test_parse_indicator_references() {
        let ind = indicators();
        assert_eq!(
            Source::parse("indicator_rsi14", &ind).unwrap(),
            Source::Indicator { id: "rsi14".into(), field: None }
        );
        assert_eq!(
            Source::parse("indicator_macd.signal", &ind).unwrap(),
            Source::Indicator { id: "macd".into(), field: Some("signal".into()) }
        );
        assert_eq!(
            Source::parse("rsi14.value", &ind).unwrap(),
            Source::Indicator { id: "rsi14".into(), field: None }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let ind = indicators();
        assert!(Source::parse("indicator_ema9", &ind).is_err());
        assert!(Source::parse("indicator_macd.upper", &ind).is_err());
        assert!(Source::parse("volume", &ind).is_err());
    }

    #[test]
    fn test_describe() {
        let ind = indicators();
        let source = Source::parse("indicator_rsi14", &ind).unwrap();
        assert_eq!(source.describe(&ind), "RSI(14)");
        assert_eq!(Operand::Constant(70.0).describe(&ind), "70");
        assert_eq!(Operand::Constant(0.5).describe(&ind), "0.5");
    }
}
