//! Stochastic oscillator.

use super::math::{closes, highest, highs, lowest, lows, over_defined, sma, Series};
use super::{period_param, Indicator};
use crate::types::{Candle, IndicatorKind, IndicatorParams, IndicatorResult};

/// Stochastic %K/%D.
///
/// Raw %K reads 50 when the high-low range of the window is zero.
pub struct Stochastic {
    k_length: usize,
    smooth_k: usize,
    d_length: usize,
}

impl Default for Stochastic {
    fn default() -> Self {
        Self {
            k_length: 14,
            smooth_k: 1,
            d_length: 3,
        }
    }
}

impl Stochastic {
    pub fn new(k_length: usize, smooth_k: usize, d_length: usize) -> Self {
        Self {
            k_length,
            smooth_k,
            d_length,
        }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(
            period_param(params, &["kLength", "kPeriod", "period"], 14),
            period_param(params, &["smoothK", "smooth"], 1),
            period_param(params, &["dLength", "dPeriod"], 3),
        )
    }

    /// %K and %D lines.
    pub fn lines(&self, candles: &[Candle]) -> (Series, Series) {
        let closes = closes(candles);
        let highest_high = highest(&highs(candles), self.k_length);
        let lowest_low = lowest(&lows(candles), self.k_length);

        let raw_k: Series = closes
            .iter()
            .enumerate()
            .map(|(i, close)| match (highest_high[i], lowest_low[i]) {
                (Some(hh), Some(ll)) => {
                    let range = hh - ll;
                    if range == 0.0 {
                        Some(50.0)
                    } else {
                        Some(100.0 * (close - ll) / range)
                    }
                }
                _ => None,
            })
            .collect();

        let k_line = if self.smooth_k > 1 {
            over_defined(&raw_k, |run| sma(run, self.smooth_k))
        } else {
            raw_k
        };
        let d_line = over_defined(&k_line, |run| sma(run, self.d_length));
        (k_line, d_line)
    }
}

impl Indicator for Stochastic {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Stochastic
    }

    fn min_periods(&self) -> usize {
        self.k_length
            .saturating_add(self.smooth_k.max(1))
            .saturating_add(self.d_length)
            .saturating_sub(2)
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        let (k, d) = self.lines(candles);
        candles
            .iter()
            .enumerate()
            .map(|(i, c)| IndicatorResult::multi(c.timestamp, k[i], &[("k", k[i]), ("d", d[i])]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::indicators::test_support::{candles_from_closes, create_uptrend_candles};
    use crate::types::Candle;

    #[test]
    fn test_stochastic_flat_range_is_50() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| Candle {
                timestamp: i * 60_000,
                open: 30.0,
                high: 30.0,
                low: 30.0,
                close: 30.0,
                volume: 1.0,
            })
            .collect();
        let series = Stochastic::default().calculate(&candles);
        assert_eq!(series[13].field(Some("k")), Some(50.0));
        assert_eq!(series[15].field(Some("d")), Some(50.0));
        assert_eq!(series[14].field(Some("d")), None);
    }

    #[test]
    fn test_stochastic_bounds() {
        let closes: Vec<f64> = (0..50).map(|i| 50.0 + ((i * 7) % 11) as f64 - 5.0).collect();
        let series = Stochastic::new(14, 3, 3).calculate(&candles_from_closes(&closes));
        for point in series {
            for field in ["k", "d"] {
                if let Some(v) = point.field(Some(field)) {
                    assert!((0.0..=100.0).contains(&v), "{} = {}", field, v);
                }
            }
        }
    }

    #[test]
    fn test_stochastic_smoothing_delays_k() {
        let candles = create_uptrend_candles(30);
        let raw = Stochastic::new(14, 1, 3).calculate(&candles);
        let smooth = Stochastic::new(14, 3, 3).calculate(&candles);
        assert!(raw[13].field(Some("k")).is_some());
        assert_eq!(smooth[14].field(Some("k")), None);
        assert!(smooth[15].field(Some("k")).is_some());
    }
}
