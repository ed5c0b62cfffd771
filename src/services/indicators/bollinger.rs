//! Bollinger Bands.

use super::math::{closes, sma, stdev};
use super::{period_param, Indicator};
use crate::types::{param, Candle, IndicatorKind, IndicatorParams, IndicatorResult};

/// Bollinger Bands: SMA basis with bands `mult` population deviations away.
pub struct Bollinger {
    period: usize,
    mult: f64,
}

impl Default for Bollinger {
    fn default() -> Self {
        Self {
            period: 20,
            mult: 2.0,
        }
    }
}

impl Bollinger {
    pub fn new(period: usize, mult: f64) -> Self {
        Self { period, mult }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(
            period_param(params, &["period", "length"], 20),
            param(params, &["stdDev", "mult", "multiplier"], 2.0),
        )
    }
}

impl Indicator for Bollinger {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Bollinger
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        let closes = closes(candles);
        let basis = sma(&closes, self.period);
        let deviation = stdev(&closes, self.period);

        candles
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let (upper, middle, lower) = match (basis[i], deviation[i]) {
                    (Some(b), Some(sd)) => {
                        let dev = self.mult * sd;
                        (Some(b + dev), Some(b), Some(b - dev))
                    }
                    _ => (None, None, None),
                };
                IndicatorResult::multi(
                    c.timestamp,
                    middle,
                    &[("upper", upper), ("middle", middle), ("lower", lower)],
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::indicators::test_support::candles_from_closes;

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let candles = candles_from_closes(&[40.0; 25]);
        let series = Bollinger::default().calculate(&candles);
        let last = series.last().unwrap();
        assert_eq!(last.field(Some("upper")), Some(40.0));
        assert_eq!(last.field(Some("lower")), Some(40.0));
        assert_eq!(series[18].value, None);
    }

    #[test]
    fn test_bollinger_band_width() {
        let closes: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 48.0 } else { 52.0 }).collect();
        let series = Bollinger::new(20, 2.0).calculate(&candles_from_closes(&closes));
        let last = series.last().unwrap();
        // Population stdev of alternating 48/52 is exactly 2.
        assert!((last.field(Some("upper")).unwrap() - 54.0).abs() < 1e-9);
        assert!((last.field(Some("lower")).unwrap() - 46.0).abs() < 1e-9);
        assert_eq!(last.value, Some(50.0));
    }
}
