//! Tick to bar aggregation.
//!
//! Bar boundaries come from tick timestamps (not wall clock) so replayed or backfilled
//! ticks produce the same bars as live ones. A bar is emitted only once its interval has
//! fully elapsed; the in-progress bar stays internal. Intervals without ticks produce no
//! bar, so consumers must not assume bars are contiguous.

use crate::{
    align::dedup,
    types::{Bar, Interval, Symbol, Tick},
};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Aggregates one symbol's ticks into bars of a single interval.
#[derive(Debug, Clone)]
pub struct Resampler {
    symbol: Symbol,
    interval: Interval,
    current: Option<OpenBar>,
    /// open_time of the last emitted bar
    emitted_through: Option<i64>,
}

#[derive(Debug, Clone)]
struct OpenBar {
    open_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: Option<f64>,
    /// Timestamp of the last applied tick
    last_ts: i64,
    /// high/low/volume before the last tick was applied, so a same-timestamp duplicate
    /// can replace it instead of both contributing
    before_last: Option<(f64, f64, Option<f64>)>,
}

impl OpenBar {
    fn start(open_time: i64, tick: &Tick) -> Self {
        Self {
            open_time,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            last_ts: tick.timestamp,
            before_last: None,
        }
    }

    fn apply(&mut self, tick: &Tick) {
        if tick.timestamp == self.last_ts {
            // Last write wins: roll back the superseded tick first
            match self.before_last {
                Some((high, low, volume)) => {
                    self.high = high;
                    self.low = low;
                    self.volume = volume;
                }
                None => {
                    *self = OpenBar::start(self.open_time, tick);
                    return;
                }
            }
        } else {
            self.before_last = Some((self.high, self.low, self.volume));
        }

        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume = add_volume(self.volume, tick.volume);
        self.last_ts = tick.timestamp;
    }

    /// Fold a tick older than the last applied one. It widens the range and adds
    /// volume but never replaces the open or the close.
    fn absorb_late(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.volume = add_volume(self.volume, tick.volume);

        // A later duplicate of the last tick must not roll this one back
        self.before_last = Some(match self.before_last {
            Some((high, low, volume)) => (
                high.max(tick.price),
                low.min(tick.price),
                add_volume(volume, tick.volume),
            ),
            None => (tick.price, tick.price, tick.volume),
        });
    }

    fn into_bar(self, symbol: &Symbol, interval: Interval) -> Bar {
        Bar {
            symbol: symbol.clone(),
            interval,
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

fn add_volume(total: Option<f64>, volume: Option<f64>) -> Option<f64> {
    match (total, volume) {
        (Some(total), Some(volume)) => Some(total + volume),
        (total, volume) => total.or(volume),
    }
}

impl Resampler {
    pub fn new(symbol: impl Into<Symbol>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            current: None,
            emitted_through: None,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Apply a tick. Returns the previous bar once a tick opens a later bucket.
    ///
    /// Ticks with non-finite or non-positive prices and ticks older than the open
    /// bucket are ignored. A tick older than the last one but inside the open bucket
    /// still counts towards high, low and volume.
    pub fn update(&mut self, tick: &Tick) -> Option<Bar> {
        if !tick.price.is_finite() || tick.price <= 0.0 {
            warn!(symbol = %self.symbol, price = tick.price, "resampler ignoring invalid price");
            return None;
        }

        let bucket = self.interval.align(tick.timestamp);

        if self.emitted_through.is_some_and(|emitted| bucket <= emitted) {
            trace!(symbol = %self.symbol, ts = tick.timestamp, "tick for an already emitted bar ignored");
            return None;
        }

        let Some(open) = self.current.as_mut() else {
            self.current = Some(OpenBar::start(bucket, tick));
            return None;
        };

        if bucket > open.open_time {
            let completed = std::mem::replace(open, OpenBar::start(bucket, tick));
            self.emitted_through = Some(completed.open_time);
            return Some(completed.into_bar(&self.symbol, self.interval));
        }

        if bucket < open.open_time {
            trace!(symbol = %self.symbol, ts = tick.timestamp, "tick for an already emitted bar ignored");
            return None;
        }

        if tick.timestamp < open.last_ts {
            trace!(symbol = %self.symbol, ts = tick.timestamp, "late tick folded into open bar");
            open.absorb_late(tick);
        } else {
            open.apply(tick);
        }
        None
    }

    /// Emit the open bar if `now_ms` has reached the end of its interval.
    ///
    /// Lets a clock close a bar during a lull in ticks.
    pub fn close_elapsed(&mut self, now_ms: i64) -> Option<Bar> {
        let elapsed = self
            .current
            .as_ref()
            .is_some_and(|open| now_ms >= open.open_time + self.interval.width_ms());

        if elapsed { self.flush() } else { None }
    }

    /// Emit the open bar regardless of whether its interval has elapsed.
    ///
    /// Later ticks for the flushed bucket are ignored rather than opening a duplicate.
    pub fn flush(&mut self) -> Option<Bar> {
        let open = self.current.take()?;
        self.emitted_through = Some(open.open_time);
        Some(open.into_bar(&self.symbol, self.interval))
    }

    /// Close price of the open bar, if any.
    pub fn current_price(&self) -> Option<f64> {
        self.current.as_ref().map(|open| open.close)
    }
}

/// Resample a closed range of ticks into bars.
///
/// Ticks are deduplicated (last arrival wins per timestamp) and sorted first. The final
/// bucket is emitted too, since the caller asserts the range is complete.
pub fn resample_ticks(ticks: &[Tick], interval: Interval) -> Vec<Bar> {
    let deduped = dedup(ticks);
    let Some(first) = deduped.first() else {
        return Vec::new();
    };

    let mut resampler = Resampler::new(first.symbol.clone(), interval);
    let mut bars: Vec<Bar> = deduped
        .iter()
        .filter_map(|tick| resampler.update(tick))
        .collect();
    bars.extend(resampler.flush());
    bars
}

/// Ring buffer of the most recent completed bars for one symbol and interval.
#[derive(Debug, Clone)]
pub struct BarHistory {
    bars: VecDeque<Bar>,
    max_size: usize,
}

impl BarHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, bar: Bar) {
        if self.bars.len() >= self.max_size {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Owned copy of the last `n` bars, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<Bar> {
        let start = self.bars.len().saturating_sub(n);
        self.bars.range(start..).cloned().collect()
    }

    /// Owned copy of every retained bar, oldest first.
    pub fn snapshot(&self) -> Vec<Bar> {
        self.bars.iter().cloned().collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.back().map(|bar| bar.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ts: i64, price: f64) -> Tick {
        Tick::new("ES", ts, price)
    }

    #[test]
    fn test_resampler_bar_alignment() {
        let mut resampler = Resampler::new("ES", Interval::Second5);

        // First tick at ts=1000
        assert!(resampler.update(&tick(1000, 100.0)).is_none());

        // Tick at 4999ms (same 5s window: 0-4999)
        assert!(resampler.update(&tick(4999, 101.0)).is_none());

        // Tick at 5000ms (new window: 5000-9999) - should emit bar
        let bar = resampler
            .update(&tick(5000, 102.0))
            .expect("should emit bar when crossing 5s boundary");

        assert_eq!(bar.open_time, 0);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.close, 101.0);
        assert_eq!(bar.high, 101.0);
        assert_eq!(bar.low, 100.0);
        assert_eq!(resampler.current_price(), Some(102.0));
    }

    #[test]
    fn test_resampler_uses_tick_timestamps() {
        let mut resampler = Resampler::new("ES", Interval::Second5);

        // Backfill burst: 500 ticks with historical timestamps spanning 360 seconds
        let base_ts: i64 = 1_700_000_000_000;
        let mut bars_produced = 0;

        for i in 0..500 {
            let ts = base_ts + (i * 720);
            let price = 5000.0 + (i as f64 * 0.1);

            if resampler.update(&tick(ts, price)).is_some() {
                bars_produced += 1;
            }
        }

        // 360s / 5s = 72 buckets, the last one still open
        assert_eq!(bars_produced, 71);
    }

    #[test]
    fn test_resampler_gap_produces_no_empty_bars() {
        let mut resampler = Resampler::new("ES", Interval::Second1);

        resampler.update(&tick(0, 1.0));
        let bar = resampler.update(&tick(10_500, 2.0)).unwrap();
        assert_eq!(bar.open_time, 0);

        let next = resampler.update(&tick(11_000, 3.0)).unwrap();
        assert_eq!(next.open_time, 10_000);
    }

    #[test]
    fn test_resampler_duplicate_timestamp_replaces_last_tick() {
        let mut resampler = Resampler::new("ES", Interval::Second1);

        resampler.update(&tick(0, 10.0));
        resampler.update(&tick(100, 50.0));
        // Supersedes the 50.0 tick, so 50.0 must not survive as the high
        resampler.update(&tick(100, 12.0));

        let bar = resampler.update(&tick(1_000, 11.0)).unwrap();
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.high, 12.0);
        assert_eq!(bar.low, 10.0);
        assert_eq!(bar.close, 12.0);
    }

    #[test]
    fn test_resampler_duplicate_of_first_tick_replaces_open() {
        let mut resampler = Resampler::new("ES", Interval::Second1);

        resampler.update(&tick(0, 10.0).with_volume(1.0));
        resampler.update(&tick(0, 11.0).with_volume(2.0));

        let bar = resampler.flush().unwrap();
        assert_eq!(bar.open, 11.0);
        assert_eq!(bar.high, 11.0);
        assert_eq!(bar.low, 11.0);
        assert_eq!(bar.volume, Some(2.0));
    }

    #[test]
    fn test_resampler_ignores_invalid_and_stale_ticks() {
        let mut resampler = Resampler::new("ES", Interval::Second1);

        assert!(resampler.update(&tick(0, f64::NAN)).is_none());
        assert!(resampler.update(&tick(0, -1.0)).is_none());
        assert!(resampler.current_price().is_none());

        resampler.update(&tick(2_000, 5.0));
        // Belongs to a bucket before the open one
        assert!(resampler.update(&tick(1_500, 9.0)).is_none());
        assert_eq!(resampler.current_price(), Some(5.0));
    }

    #[test]
    fn test_resampler_folds_late_ticks_inside_open_bucket() {
        struct TestCase {
            ticks: Vec<Tick>,
            expected: (f64, f64, f64, f64, Option<f64>),
        }

        let tests = vec![
            TestCase {
                // TC0: late tick sets the high but not the close
                ticks: vec![tick(1_200, 10.0), tick(1_500, 11.0), tick(1_450, 50.0), tick(1_600, 12.0)],
                expected: (10.0, 50.0, 10.0, 12.0, None),
            },
            TestCase {
                // TC1: late tick before the first one does not replace the open
                ticks: vec![tick(1_500, 10.0), tick(1_100, 8.0)],
                expected: (10.0, 10.0, 8.0, 10.0, None),
            },
            TestCase {
                // TC2: duplicate of the last tick keeps the late tick's contribution
                ticks: vec![
                    tick(1_000, 10.0).with_volume(1.0),
                    tick(1_500, 11.0).with_volume(1.0),
                    tick(1_200, 50.0).with_volume(2.0),
                    tick(1_500, 12.0).with_volume(3.0),
                ],
                expected: (10.0, 50.0, 10.0, 12.0, Some(6.0)),
            },
            TestCase {
                // TC3: late tick after a single tick survives a duplicate of that tick
                ticks: vec![tick(1_500, 10.0), tick(1_200, 5.0), tick(1_500, 11.0)],
                expected: (10.0, 11.0, 5.0, 11.0, None),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut resampler = Resampler::new("ES", Interval::Second1);
            for tick in &test.ticks {
                assert!(resampler.update(tick).is_none(), "TC{} failed", index);
            }

            let bar = resampler.update(&tick(2_100, 1.0)).unwrap();
            assert_eq!(bar.open_time, 1_000, "TC{} failed", index);
            assert_eq!(
                (bar.open, bar.high, bar.low, bar.close, bar.volume),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_close_elapsed_waits_for_interval_end() {
        let mut resampler = Resampler::new("ES", Interval::Second1);
        resampler.update(&tick(1_200, 5.0));

        assert!(resampler.close_elapsed(1_999).is_none());
        let bar = resampler.close_elapsed(2_000).unwrap();
        assert_eq!(bar.open_time, 1_000);
        assert!(resampler.close_elapsed(5_000).is_none());

        // A straggler for the closed bucket must not open a second 1_000 bar
        assert!(resampler.update(&tick(1_900, 6.0)).is_none());
        assert!(resampler.current_price().is_none());

        resampler.update(&tick(2_100, 7.0));
        assert_eq!(resampler.flush().unwrap().open_time, 2_000);
    }

    #[test]
    fn test_resample_ticks_volume_and_flush() {
        let ticks = vec![
            tick(0, 1.0).with_volume(2.0),
            tick(500, 3.0).with_volume(1.0),
            tick(1_200, 2.0),
        ];

        let bars = resample_ticks(&ticks, Interval::Second1);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, Some(3.0));
        assert_eq!(bars[0].high, 3.0);
        assert_eq!(bars[1].open_time, 1_000);
        assert_eq!(bars[1].volume, None);
    }

    #[test]
    fn test_bar_history_ring_behavior() {
        let mut history = BarHistory::new(3);

        for i in 0..5 {
            let price = i as f64 + 1.0;
            history.push(Bar {
                symbol: Symbol::new("ES"),
                interval: Interval::Second1,
                open_time: i * 1_000,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: None,
            });
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.last_close(), Some(5.0));
        let last_two: Vec<i64> = history.last_n(2).iter().map(|b| b.open_time).collect();
        assert_eq!(last_two, vec![3_000, 4_000]);
        assert_eq!(history.last_n(10).len(), 3);
    }
}
