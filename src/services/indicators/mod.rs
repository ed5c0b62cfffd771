//! Indicator library.
//!
//! Pure functions from candles to timestamp-aligned series. Every indicator
//! returns one `IndicatorResult` per input candle, with `None` values during
//! warm-up.

mod atr;
mod bollinger;
mod macd;
pub mod math;
mod moving_average;
mod rolling_up;
mod rsi;
mod stochastic;
mod vwap;

pub use atr::Atr;
pub use bollinger::Bollinger;
pub use macd::Macd;
pub use moving_average::{Ema, Sma};
pub use rolling_up::RollingUpPercent;
pub use rsi::{rsi_series, Rsi};
pub use stochastic::Stochastic;
pub use vwap::Vwap;

use crate::types::{param, Candle, IndicatorConfig, IndicatorKind, IndicatorParams, IndicatorResult};
use math::Series;
use tracing::{debug, warn};

/// A configured indicator that can be run over a candle array.
pub trait Indicator: Send + Sync {
    fn kind(&self) -> IndicatorKind;

    /// Number of candles needed before the first defined output.
    fn min_periods(&self) -> usize;

    /// Compute the series, one result per candle.
    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult>;
}

/// Build an indicator from its type and parameters.
pub fn build(kind: IndicatorKind, params: &IndicatorParams) -> Option<Box<dyn Indicator>> {
    let indicator: Box<dyn Indicator> = match kind {
        IndicatorKind::Rsi => Box::new(Rsi::from_params(params)),
        IndicatorKind::Macd => Box::new(Macd::from_params(params)),
        IndicatorKind::Sma => Box::new(Sma::from_params(params)),
        IndicatorKind::Ema => Box::new(Ema::from_params(params)),
        IndicatorKind::Bollinger => Box::new(Bollinger::from_params(params)),
        IndicatorKind::Stochastic => Box::new(Stochastic::from_params(params)),
        IndicatorKind::Atr => Box::new(Atr::from_params(params)),
        IndicatorKind::Vwap => Box::new(Vwap::from_params(params)),
        IndicatorKind::RollingUpPercent => Box::new(RollingUpPercent::from_params(params)),
        IndicatorKind::Unsupported => return None,
    };
    Some(indicator)
}

/// Compute an indicator series. Unknown types are logged and yield no values.
pub fn compute(kind: IndicatorKind, params: &IndicatorParams, candles: &[Candle]) -> Vec<IndicatorResult> {
    match build(kind, params) {
        Some(indicator) => {
            if candles.len() < indicator.min_periods() {
                debug!(
                    indicator = %kind,
                    required = indicator.min_periods(),
                    available = candles.len(),
                    "Too few candles for a defined value"
                );
            }
            indicator.calculate(candles)
        }
        None => {
            warn!(indicator = %kind, "Unsupported indicator type, no values produced");
            Vec::new()
        }
    }
}

/// Compute the series for a strategy's indicator config.
pub fn compute_config(config: &IndicatorConfig, candles: &[Candle]) -> Vec<IndicatorResult> {
    compute(config.kind, &config.parameters, candles)
}

/// Read an integer period parameter; anything below 1 becomes 0 (no output).
pub(crate) fn period_param(params: &IndicatorParams, names: &[&str], default: usize) -> usize {
    let v = param(params, names, default as f64).round();
    if v >= 1.0 {
        v as usize
    } else {
        0
    }
}

/// Pair a scalar series with candle timestamps.
pub(crate) fn scalar_results(candles: &[Candle], series: Series) -> Vec<IndicatorResult> {
    candles
        .iter()
        .zip(series)
        .map(|(c, v)| IndicatorResult::scalar(c.timestamp, v))
        .collect()
}
