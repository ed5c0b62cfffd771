//! Tick to candle aggregation.

use crate::types::{Candle, Direction, Tick, Timeframe};
use tracing::trace;

/// Streaming candle builder for one market, timeframe and side.
///
/// Holds at most one open candle. A tick landing in a later bucket closes the
/// open candle and returns it; empty buckets in between are not synthesized.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    interval_ms: i64,
    direction: Direction,
    current: Option<Candle>,
}

impl CandleBuilder {
    pub fn new(timeframe: Timeframe, direction: Direction) -> Self {
        Self::with_interval_ms(timeframe.duration_ms(), direction)
    }

    /// Builder with an arbitrary interval. Intervals below 1ms are clamped to 1ms.
    pub fn with_interval_ms(interval_ms: i64, direction: Direction) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            direction,
            current: None,
        }
    }

    /// Start of the bucket containing `t`.
    pub fn bucket_start(&self, t: i64) -> i64 {
        t.div_euclid(self.interval_ms) * self.interval_ms
    }

    /// Add a tick. Returns the candle that closed because of it, if any.
    ///
    /// Ticks whose side price is exactly 0 are missing quotes and are skipped,
    /// as are ticks older than the open bucket.
    pub fn push(&mut self, tick: &Tick) -> Option<Candle> {
        let price = self.direction.price(tick);
        if price == 0.0 || !price.is_finite() {
            return None;
        }

        let bucket = self.bucket_start(tick.t);
        match self.current.as_mut() {
            Some(open) if open.timestamp == bucket => {
                open.update(price);
                None
            }
            Some(open) if bucket < open.timestamp => {
                trace!(tick_time = tick.t, bucket = open.timestamp, "Skipping out-of-order tick");
                None
            }
            _ => self.current.replace(Candle::new(bucket, price)),
        }
    }

    /// The candle still forming, if any.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Close and return the open candle.
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take()
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }
}

/// Aggregate an ordered tick range into candles, including the final bucket.
pub fn build_candles(ticks: &[Tick], timeframe: Timeframe, direction: Direction) -> Vec<Candle> {
    aggregate(CandleBuilder::new(timeframe, direction), ticks)
}

/// Like [`build_candles`] but drops the last bucket if it has not closed by `as_of_ms`.
pub fn build_closed_candles(
    ticks: &[Tick],
    timeframe: Timeframe,
    direction: Direction,
    as_of_ms: i64,
) -> Vec<Candle> {
    let mut candles = build_candles(ticks, timeframe, direction);
    let interval = timeframe.duration_ms();
    while candles
        .last()
        .map(|c| c.timestamp + interval > as_of_ms)
        .unwrap_or(false)
    {
        candles.pop();
    }
    candles
}

fn aggregate(mut builder: CandleBuilder, ticks: &[Tick]) -> Vec<Candle> {
    let mut candles = Vec::new();
    for tick in ticks {
        if let Some(closed) = builder.push(tick) {
            candles.push(closed);
        }
    }
    if let Some(last) = builder.flush() {
        candles.push(last);
    }
    candles
}
