//! Moving Average Convergence Divergence.

use super::math::{closes, ema, over_defined, Series};
use super::{period_param, Indicator};
use crate::types::{Candle, IndicatorKind, IndicatorParams, IndicatorResult};

/// MACD indicator.
///
/// `macd` is the fast EMA minus the slow EMA, `signal` an EMA of the defined
/// part of `macd`, and `histogram` their difference wherever the signal exists.
/// The primary value is the MACD line.
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
}

impl Default for Macd {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self { fast, slow, signal }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(
            period_param(params, &["fast", "fastPeriod", "fastLength"], 12),
            period_param(params, &["slow", "slowPeriod", "slowLength"], 26),
            period_param(params, &["signal", "signalPeriod", "signalLength"], 9),
        )
    }

    /// MACD, signal and histogram lines over a close series.
    pub fn lines(&self, closes: &[f64]) -> (Series, Series, Series) {
        let fast = ema(closes, self.fast);
        let slow = ema(closes, self.slow);

        let macd: Series = fast
            .iter()
            .zip(&slow)
            .map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect();

        let signal = over_defined(&macd, |run| ema(run, self.signal));

        let histogram: Series = macd
            .iter()
            .zip(&signal)
            .map(|(m, s)| match (m, s) {
                (Some(m), Some(s)) => Some(m - s),
                _ => None,
            })
            .collect();

        (macd, signal, histogram)
    }
}

impl Indicator for Macd {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Macd
    }

    fn min_periods(&self) -> usize {
        self.fast.max(self.slow).saturating_add(self.signal).saturating_sub(1)
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        let (macd, signal, histogram) = self.lines(&closes(candles));
        candles
            .iter()
            .enumerate()
            .map(|(i, c)| {
                IndicatorResult::multi(
                    c.timestamp,
                    macd[i],
                    &[
                        ("macd", macd[i]),
                        ("signal", signal[i]),
                        ("histogram", histogram[i]),
                    ],
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::indicators::test_support::create_uptrend_candles;

    #[test]
    fn test_macd_warmup() {
        let candles = create_uptrend_candles(50);
        let series = Macd::default().calculate(&candles);

        assert_eq!(series[24].field(Some("macd")), None);
        assert!(series[25].field(Some("macd")).is_some());
        // Signal needs nine MACD values: 25 + 8.
        assert_eq!(series[32].field(Some("signal")), None);
        assert!(series[33].field(Some("signal")).is_some());
        assert_eq!(series[32].field(Some("histogram")), None);
    }

    #[test]
    fn test_macd_histogram_identity() {
        let candles = create_uptrend_candles(80);
        for point in Macd::new(5, 10, 4).calculate(&candles) {
            if let (Some(m), Some(s), Some(h)) = (
                point.field(Some("macd")),
                point.field(Some("signal")),
                point.field(Some("histogram")),
            ) {
                assert!((h - (m - s)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let candles = create_uptrend_candles(60);
        let series = Macd::default().calculate(&candles);
        assert!(series.last().unwrap().value.unwrap() > 0.0);
    }
}
