use super::Indicator;
use crate::types::{param, Candle, IndicatorKind, IndicatorParams, IndicatorResult};
use chrono::{NaiveDate, TimeZone, Utc};

/// Volume-weighted average of the typical price, with volume being tick count.
///
/// With `reset_daily` the running sums restart whenever the UTC date of the
/// candle changes.
pub struct Vwap {
    reset_daily: bool,
}

impl Default for Vwap {
    fn default() -> Self {
        Self { reset_daily: true }
    }
}

impl Vwap {
    pub fn new(reset_daily: bool) -> Self {
        Self { reset_daily }
    }

    pub fn from_params(params: &IndicatorParams) -> Self {
        Self::new(param(params, &["resetDaily", "reset_daily"], 1.0) != 0.0)
    }
}

fn utc_date(timestamp_ms: i64) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.date_naive())
}

impl Indicator for Vwap {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Vwap
    }

    fn min_periods(&self) -> usize {
        1
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<IndicatorResult> {
        let mut cum_pv = 0.0;
        let mut cum_volume = 0.0;
        let mut session: Option<NaiveDate> = None;

        candles
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if self.reset_daily {
                    let day = utc_date(c.timestamp);
                    if i > 0 && day != session {
                        cum_pv = 0.0;
                        cum_volume = 0.0;
                    }
                    session = day;
                }

                cum_pv += c.typical_price() * c.volume;
                cum_volume += c.volume;

                let value = if cum_volume > 0.0 {
                    Some(cum_pv / cum_volume)
                } else {
                    None
                };
                IndicatorResult::scalar(c.timestamp, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    fn candle(timestamp: i64, price: f64, volume: f64) -> Candle {
        Candle {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    #[test]
    fn test_vwap_weights_by_tick_count() {
        let candles = vec![candle(0, 10.0, 1.0), candle(60_000, 20.0, 3.0)];
        let series = Vwap::new(false).calculate(&candles);
        assert_eq!(series[0].value, Some(10.0));
        assert_eq!(series[1].value, Some(17.5));
    }

    #[test]
    fn test_vwap_daily_reset() {
        let candles = vec![
            candle(DAY_MS - 120_000, 10.0, 1.0),
            candle(DAY_MS - 60_000, 20.0, 1.0),
            candle(DAY_MS, 40.0, 1.0),
        ];
        let reset = Vwap::new(true).calculate(&candles);
        assert_eq!(reset[1].value, Some(15.0));
        assert_eq!(reset[2].value, Some(40.0));

        let running = Vwap::new(false).calculate(&candles);
        assert!((running[2].value.unwrap() - 70.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_vwap_zero_volume_undefined() {
        let series = Vwap::new(false).calculate(&[candle(0, 10.0, 0.0)]);
        assert_eq!(series[0].value, None);
    }
}
