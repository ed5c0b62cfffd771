use serde::{Deserialize, Serialize};
use std::fmt;

/// A single quote snapshot for a binary-outcome market, prices in cents (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    /// Epoch milliseconds.
    pub t: i64,
    pub yes_bid: f64,
    pub yes_ask: f64,
    pub no_bid: f64,
    pub no_ask: f64,
}

impl Tick {
    pub fn new(t: i64, yes_bid: f64, yes_ask: f64, no_bid: f64, no_ask: f64) -> Self {
        Self {
            t,
            yes_bid,
            yes_ask,
            no_bid,
            no_ask,
        }
    }
}

/// Which side of the market a strategy trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "yes")]
    Long,
    #[serde(alias = "no")]
    Short,
}

impl Direction {
    /// The price this side is marked at: yes-bid for long, no-bid for short.
    pub fn price(&self, tick: &Tick) -> f64 {
        match self {
            Direction::Long => tick.yes_bid,
            Direction::Short => tick.no_bid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    /// Parse a timeframe label such as `15m` or `1h`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" => Some(Timeframe::OneMinute),
            "5m" | "5min" => Some(Timeframe::FiveMinutes),
            "15m" | "15min" => Some(Timeframe::FifteenMinutes),
            "30m" | "30min" => Some(Timeframe::ThirtyMinutes),
            "1h" | "60m" => Some(Timeframe::OneHour),
            "4h" => Some(Timeframe::FourHours),
            "1d" | "24h" => Some(Timeframe::OneDay),
            _ => None,
        }
    }

    /// Interval length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::OneMinute => 60_000,
            Timeframe::FiveMinutes => 300_000,
            Timeframe::FifteenMinutes => 900_000,
            Timeframe::ThirtyMinutes => 1_800_000,
            Timeframe::OneHour => 3_600_000,
            Timeframe::FourHours => 14_400_000,
            Timeframe::OneDay => 86_400_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
            Timeframe::OneDay => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-interval OHLC aggregate of ticks.
///
/// `timestamp` is the bucket start and `volume` is the number of ticks that
/// fell into the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }
    }

    /// Fold another tick price into the candle.
    pub fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += 1.0;
    }

    pub fn is_up(&self) -> bool {
        self.close >= self.open
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}
