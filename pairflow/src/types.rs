//! Core data types shared across the engine.
//!
//! Timestamps are integer milliseconds since the Unix epoch throughout.

use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Instrument identifier (e.g. "ES", "BTCUSDT").
pub type Symbol = smol_str::SmolStr;

/// The two instruments analysed together. `y` is regressed on `x`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Constructor, Display)]
#[display("{y}/{x}")]
pub struct Pair {
    pub x: Symbol,
    pub y: Symbol,
}

impl Pair {
    /// Check whether `symbol` is one of the two legs.
    pub fn contains(&self, symbol: &str) -> bool {
        self.x == symbol || self.y == symbol
    }
}

/// A single price observation pushed by the feed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    pub symbol: Symbol,
    /// Exchange timestamp in milliseconds
    pub timestamp: i64,
    pub price: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Tick {
    pub fn new(symbol: impl Into<Symbol>, timestamp: i64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Fixed bar width.
///
/// The textual form is strictly `<n><unit>` with unit `s`, `m` or `h`, and only the
/// enumerated widths are accepted. Aliases such as `1min`, `1T` or `60s` are rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, Display,
)]
pub enum Interval {
    #[serde(rename = "1s")]
    #[display("1s")]
    Second1,
    #[serde(rename = "5s")]
    #[display("5s")]
    Second5,
    #[serde(rename = "1m")]
    #[display("1m")]
    Minute1,
    #[serde(rename = "5m")]
    #[display("5m")]
    Minute5,
    #[serde(rename = "15m")]
    #[display("15m")]
    Minute15,
    #[serde(rename = "1h")]
    #[display("1h")]
    Hour1,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::Second1,
        Interval::Second5,
        Interval::Minute1,
        Interval::Minute5,
        Interval::Minute15,
        Interval::Hour1,
    ];

    /// Bar width in milliseconds.
    pub const fn width_ms(&self) -> i64 {
        match self {
            Interval::Second1 => 1_000,
            Interval::Second5 => 5_000,
            Interval::Minute1 => 60_000,
            Interval::Minute5 => 300_000,
            Interval::Minute15 => 900_000,
            Interval::Hour1 => 3_600_000,
        }
    }

    /// Start of the bucket containing `timestamp`.
    #[inline]
    pub const fn align(&self, timestamp: i64) -> i64 {
        let width = self.width_ms();
        timestamp - timestamp.rem_euclid(width)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported interval '{0}', expected one of 1s, 5s, 1m, 5m, 15m, 1h")]
pub struct ParseIntervalError(pub String);

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|interval| interval.to_string() == s)
            .ok_or_else(|| ParseIntervalError(s.to_string()))
    }
}

/// OHLC summary of the deduplicated ticks inside one interval.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub interval: Interval,
    /// Bucket start, aligned to the interval width
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Which observations an analytics cycle runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsSource {
    /// Raw deduplicated tick prices.
    #[display("ticks")]
    Ticks,
    /// Close prices of completed bars.
    #[display("{_0}")]
    Bars(Interval),
}

impl FromStr for AnalyticsSource {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ticks" => Ok(AnalyticsSource::Ticks),
            other => other.parse().map(AnalyticsSource::Bars),
        }
    }
}

/// A timestamped price, the unit the aligner and the statistics operate on.
pub trait Observation {
    fn timestamp(&self) -> i64;
    fn price(&self) -> f64;
}

impl Observation for Tick {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn price(&self) -> f64 {
        self.price
    }
}

impl Observation for Bar {
    fn timestamp(&self) -> i64 {
        self.open_time
    }

    fn price(&self) -> f64 {
        self.close
    }
}
