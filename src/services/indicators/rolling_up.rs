use super::math::Series;
use super::{period_param, scalar_results, Indicator};
use crate::types::{Candle, IndicatorKind, IndicatorParams, IndicatorResult};

/// Percentage of candles closing at or above their open over a trailing window.
pub struct RollingUpPercent {
    period: usize,
}

impl RollingUpPercent {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(period_param(params, &["period", "length", "window"], 20))
    }
}

impl Indicator for RollingUpPercent {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::RollingUpPercent
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        let mut series: Series = vec![None; candles.len()];
        if self.period > 0 && candles.len() >= self.period {
            for i in (self.period - 1)..candles.len() {
                let window = &candles[i + 1 - self.period..=i];
                let up = window.iter().filter(|c| c.is_up()).count();
                series[i] = Some(up as f64 / self.period as f64 * 100.0);
            }
        }
        scalar_results(candles, series)
    }
}
