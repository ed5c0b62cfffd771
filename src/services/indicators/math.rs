//! Building blocks shared by the indicators.
//!
//! Every function returns one slot per input value; `None` marks a position
//! where the result is not yet defined (warm-up).

use crate::types::Candle;

/// Series with undefined warm-up positions.
pub type Series = Vec<Option<f64>>;

/// Arithmetic mean of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        out[i] = Some(window.iter().sum::<f64>() / period as f64);
    }
    out
}

/// Exponential moving average with alpha = 2/(period+1).
///
/// Seeding follows the reference charting toolkit: the recursion starts at
/// `values[0]` and blends forward on its own previous output, then position
/// `period-1` is reseeded with the plain SMA of the first `period` values.
/// Only positions from the seed onward are emitted.
pub fn ema(values: &[f64], period: usize) -> Series {
    let alpha = 2.0 / (period as f64 + 1.0);
    seeded_recursion(values, period, alpha)
}

/// Wilder's moving average (RMA), alpha = 1/period, seeded with the SMA of
/// the first `period` values at index `period-1`.
pub fn rma(values: &[f64], period: usize) -> Series {
    let alpha = 1.0 / period as f64;
    seeded_recursion(values, period, alpha)
}

fn seeded_recursion(values: &[f64], period: usize, alpha: f64) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    // Positions before the seed carry a running blend from values[0] that the
    // seed replaces, so nothing before period-1 is observable.
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);

    for i in period..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

/// Population standard deviation against the SMA over the same window.
pub fn stdev(values: &[f64], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        out[i] = Some(variance.sqrt());
    }
    out
}

/// True range per candle; the first bar has no previous close and uses high-low.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let range = c.high - c.low;
            if i == 0 {
                return range;
            }
            let prev_close = candles[i - 1].close;
            range
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .collect()
}

/// Rolling maximum over the trailing `period` values.
pub fn highest(values: &[f64], period: usize) -> Series {
    rolling(values, period, |window| window.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Rolling minimum over the trailing `period` values.
pub fn lowest(values: &[f64], period: usize) -> Series {
    rolling(values, period, |window| window.iter().copied().fold(f64::INFINITY, f64::min))
}

fn rolling(values: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        out[i] = Some(f(&values[i + 1 - period..=i]));
    }
    out
}

/// Run `f` over the first contiguous run of defined values in `series` and
/// place its output back at the same positions.
pub fn over_defined(series: &[Option<f64>], f: impl FnOnce(&[f64]) -> Series) -> Series {
    let mut out = vec![None; series.len()];
    let Some(start) = series.iter().position(|v| v.is_some()) else {
        return out;
    };
    let run: Vec<f64> = series[start..].iter().map_while(|v| *v).collect();
    for (offset, v) in f(&run).into_iter().enumerate() {
        out[start + offset] = v;
    }
    out
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

pub fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high).collect()
}

pub fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sma_warmup_and_values() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(approx(out[2].unwrap(), 2.0));
        assert!(approx(out[4].unwrap(), 4.0));
    }

    #[test]
    fn test_sma_too_short() {
        assert!(sma(&[1.0, 2.0], 3).iter().all(|v| v.is_none()));
        assert!(sma(&[1.0, 2.0], 0).iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let values = [2.0, 4.0, 6.0, 8.0, 10.0];
        let out = ema(&values, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        // Seed is the SMA of the first three values.
        assert!(approx(out[2].unwrap(), 4.0));
        // alpha = 0.5
        assert!(approx(out[3].unwrap(), 0.5 * 8.0 + 0.5 * 4.0));
        assert!(approx(out[4].unwrap(), 0.5 * 10.0 + 0.5 * 6.0));
    }

    #[test]
    fn test_ema_period_one_tracks_input() {
        let values = [3.0, 7.0, 5.0];
        let out = ema(&values, 1);
        assert_eq!(out, vec![Some(3.0), Some(7.0), Some(5.0)]);
    }

    #[test]
    fn test_rma_wilder_smoothing() {
        let values = [1.0, 2.0, 3.0, 6.0];
        let out = rma(&values, 3);
        assert_eq!(out[1], None);
        assert!(approx(out[2].unwrap(), 2.0));
        assert!(approx(out[3].unwrap(), (2.0 * 2.0 + 6.0) / 3.0));
    }

    #[test]
    fn test_stdev_population() {
        let out = stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        assert!(approx(out[7].unwrap(), 2.0));
        assert_eq!(out[6], None);
    }

    #[test]
    fn test_true_range_first_bar() {
        let candles = vec![
            Candle { timestamp: 0, open: 10.0, high: 12.0, low: 9.0, close: 11.0, volume: 1.0 },
            Candle { timestamp: 1, open: 11.0, high: 11.5, low: 10.5, close: 11.0, volume: 1.0 },
            Candle { timestamp: 2, open: 15.0, high: 16.0, low: 14.0, close: 15.0, volume: 1.0 },
        ];
        let tr = true_range(&candles);
        assert!(approx(tr[0], 3.0));
        assert!(approx(tr[1], 1.0));
        // Gap up: high - previous close.
        assert!(approx(tr[2], 5.0));
    }

    #[test]
    fn test_highest_lowest() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0];
        let hi = highest(&values, 3);
        let lo = lowest(&values, 3);
        assert_eq!(hi[1], None);
        assert_eq!(hi[2], Some(4.0));
        assert_eq!(hi[4], Some(5.0));
        assert_eq!(lo[2], Some(1.0));
        assert_eq!(lo[4], Some(1.0));
    }

    #[test]
    fn test_over_defined_repads() {
        let series = vec![None, None, Some(1.0), Some(2.0), Some(3.0)];
        let out = over_defined(&series, |run| sma(run, 2));
        assert_eq!(out[0], None);
        assert_eq!(out[2], None);
        assert!(approx(out[3].unwrap(), 1.5));
        assert!(approx(out[4].unwrap(), 2.5));
    }
}
