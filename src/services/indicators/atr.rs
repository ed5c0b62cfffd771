use super::math::{rma, true_range};
use super::{period_param, scalar_results, Indicator};
use crate::types::{Candle, IndicatorKind, IndicatorParams, IndicatorResult};

/// Average True Range: Wilder-smoothed true range.
pub struct Atr {
    period: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(period_param(params, &["period", "length"], 14))
    }
}

impl Indicator for Atr {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Atr
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        scalar_results(candles, rma(&true_range(candles), self.period))
    }
}
