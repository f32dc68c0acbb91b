//! Bounded per-symbol tick storage.

use crate::{
    error::AnalyticsError,
    types::{Symbol, Tick},
};
use std::collections::VecDeque;

/// Most recent ticks of one symbol, in arrival order.
///
/// When full the oldest tick is evicted. Duplicate timestamps are kept as received;
/// deduplication happens on the snapshot side so last-arrival-wins stays well defined.
#[derive(Debug, Clone)]
pub struct TickBuffer {
    symbol: Symbol,
    ticks: VecDeque<Tick>,
    capacity: usize,
    tolerance_ms: i64,
    max_seen: Option<i64>,
    evicted: u64,
}

impl TickBuffer {
    pub fn new(symbol: impl Into<Symbol>, capacity: usize, tolerance_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            ticks: VecDeque::with_capacity(capacity),
            capacity,
            tolerance_ms,
            max_seen: None,
            evicted: 0,
        }
    }

    /// Accept a tick, evicting the oldest if at capacity.
    ///
    /// Rejects non-finite or non-positive prices, and ticks whose timestamp regresses
    /// more than the tolerance behind the newest accepted one.
    pub fn push(&mut self, tick: Tick) -> Result<(), AnalyticsError> {
        if !tick.price.is_finite() {
            return Err(AnalyticsError::non_finite(format!("{} price", self.symbol)));
        }
        if tick.price <= 0.0 {
            return Err(AnalyticsError::degenerate(format!(
                "{} price {} is not positive",
                self.symbol, tick.price
            )));
        }
        if let Some(max_seen) = self.max_seen
            && tick.timestamp < max_seen - self.tolerance_ms
        {
            return Err(AnalyticsError::IngestionOutOfOrder {
                symbol: self.symbol.clone(),
                timestamp: tick.timestamp,
                last_timestamp: max_seen,
            });
        }

        if self.ticks.len() >= self.capacity {
            self.ticks.pop_front();
            self.evicted += 1;
        }
        self.max_seen = Some(self.max_seen.map_or(tick.timestamp, |max| max.max(tick.timestamp)));
        self.ticks.push_back(tick);
        Ok(())
    }

    /// Owned copy of the buffered ticks, oldest first.
    pub fn snapshot(&self) -> Vec<Tick> {
        self.ticks.iter().cloned().collect()
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Ticks dropped to make room since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Newest accepted timestamp.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.max_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ts: i64, price: f64) -> Tick {
        Tick::new("ES", ts, price)
    }

    #[test]
    fn test_push_evicts_oldest_first() {
        let mut buffer = TickBuffer::new("ES", 3, 0);
        for ts in 0..5 {
            buffer.push(tick(ts, 1.0 + ts as f64)).unwrap();
        }

        let stamps: Vec<i64> = buffer.snapshot().iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![2, 3, 4]);
        assert_eq!(buffer.evicted(), 2);
        assert_eq!(buffer.last_timestamp(), Some(4));
    }

    #[test]
    fn test_push_keeps_duplicate_timestamps() {
        let mut buffer = TickBuffer::new("ES", 10, 0);
        buffer.push(tick(0, 10.0)).unwrap();
        buffer.push(tick(0, 11.0)).unwrap();

        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_push_rejections() {
        struct TestCase {
            input: Tick,
            expected: Result<(), AnalyticsError>,
        }

        let tests = vec![
            TestCase {
                // TC0: in order
                input: tick(110, 1.0),
                expected: Ok(()),
            },
            TestCase {
                // TC1: regression within tolerance
                input: tick(95, 1.0),
                expected: Ok(()),
            },
            TestCase {
                // TC2: regression beyond tolerance
                input: tick(80, 1.0),
                expected: Err(AnalyticsError::IngestionOutOfOrder {
                    symbol: Symbol::new("ES"),
                    timestamp: 80,
                    last_timestamp: 110,
                }),
            },
            TestCase {
                // TC3: NaN price
                input: tick(120, f64::NAN),
                expected: Err(AnalyticsError::non_finite("ES price")),
            },
            TestCase {
                // TC4: zero price
                input: tick(120, 0.0),
                expected: Err(AnalyticsError::degenerate("ES price 0 is not positive")),
            },
        ];

        let mut buffer = TickBuffer::new("ES", 10, 20);
        buffer.push(tick(100, 1.0)).unwrap();

        for (index, test) in tests.into_iter().enumerate() {
            let actual = buffer.push(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
        assert_eq!(buffer.len(), 3);
    }
}
