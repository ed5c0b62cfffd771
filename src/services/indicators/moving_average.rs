//! Simple and exponential moving averages of the close.

use super::math::{closes, ema, sma};
use super::{period_param, scalar_results, Indicator};
use crate::types::{Candle, IndicatorKind, IndicatorParams, IndicatorResult};

/// Simple moving average of closes.
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(period_param(params, &["period", "length"], 20))
    }
}

impl Indicator for Sma {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sma
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        scalar_results(candles, sma(&closes(candles), self.period))
    }
}

/// Exponential moving average of closes.
pub struct Ema {
    period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(period_param(params, &["period", "length"], 20))
    }
}

impl Indicator for Ema {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Ema
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        scalar_results(candles, ema(&closes(candles), self.period))
    }
}
