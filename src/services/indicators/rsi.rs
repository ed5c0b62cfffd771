//! Relative Strength Index.

use super::math::{closes, rma, Series};
use super::{period_param, scalar_results, Indicator};
use crate::types::{Candle, IndicatorKind, IndicatorParams, IndicatorResult};

/// RSI (Relative Strength Index) indicator.
///
/// Wilder-smoothed ratio of average gains to average losses, bounded to 0-100.
/// A window with no losses reads 100 and a window with no gains reads 0.
pub struct Rsi {
    period: usize,
}

impl Default for Rsi {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(period_param(params, &["period", "length"], 14))
    }
}

/// RSI over a close series. The first defined value sits at index `period`
/// since it needs `period` price changes.
pub fn rsi_series(closes: &[f64], period: usize) -> Series {
    let mut out = vec![None; closes.len()];
    if closes.len() < 2 {
        return out;
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = closes
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            if change > 0.0 {
                (change, 0.0)
            } else {
                (0.0, -change)
            }
        })
        .unzip();

    let avg_gain = rma(&gains, period);
    let avg_loss = rma(&losses, period);

    for (j, (gain, loss)) in avg_gain.iter().zip(&avg_loss).enumerate() {
        if let (Some(gain), Some(loss)) = (gain, loss) {
            out[j + 1] = Some(rsi_value(*gain, *loss));
        }
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    if avg_gain == 0.0 {
        return 0.0;
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

impl Indicator for Rsi {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn min_periods(&self) -> usize {
        self.period.saturating_add(1)
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        scalar_results(candles, rsi_series(&closes(candles), self.period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::indicators::test_support::{candles_from_closes, create_uptrend_candles};

    #[test]
    fn test_rsi_uptrend_is_100() {
        let candles = create_uptrend_candles(30);
        let series = Rsi::default().calculate(&candles);
        assert_eq!(series[13].value, None);
        assert_eq!(series[14].value, Some(100.0));
    }

    #[test]
    fn test_rsi_downtrend_is_0() {
        let closes: Vec<f64> = (0..30).map(|i| 80.0 - i as f64).collect();
        let series = Rsi::default().calculate(&candles_from_closes(&closes));
        assert_eq!(series[29].value, Some(0.0));
    }

    #[test]
    fn test_rsi_constant_price_is_100() {
        let candles = candles_from_closes(&[50.0; 40]);
        let series = Rsi::new(14).calculate(&candles);
        for point in &series[14..] {
            assert_eq!(point.value, Some(100.0));
        }
        assert!(series[..14].iter().all(|p| p.value.is_none()));
    }

    #[test]
    fn test_rsi_balanced_moves_near_50() {
        let closes: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 50.0 } else { 51.0 }).collect();
        let series = Rsi::new(14).calculate(&candles_from_closes(&closes));
        let last = series.last().unwrap().value.unwrap();
        assert!((last - 50.0).abs() < 5.0, "rsi = {}", last);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let candles = create_uptrend_candles(10);
        let series = Rsi::new(14).calculate(&candles);
        assert!(series.iter().all(|p| p.value.is_none()));
    }
}
