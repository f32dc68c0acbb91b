//! Shared engine state and its read-only view.

use crate::{
    buffer::TickBuffer,
    config::EngineConfig,
    error::EngineError,
    record::AnalyticsRecord,
    resample::BarHistory,
    types::{AnalyticsSource, Bar, Interval, Pair, Symbol, Tick},
};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

/// Storage for one leg of the pair. Written only by that symbol's ingestion task.
#[derive(Debug)]
pub(crate) struct SymbolStore {
    pub(crate) ticks: RwLock<TickBuffer>,
    pub(crate) bars: FnvHashMap<Interval, RwLock<BarHistory>>,
}

impl SymbolStore {
    fn new(symbol: &Symbol, config: &EngineConfig, intervals: &BTreeSet<Interval>) -> Self {
        Self {
            ticks: RwLock::new(TickBuffer::new(
                symbol.clone(),
                config.buffer_capacity,
                config.tolerance_ms(),
            )),
            bars: intervals
                .iter()
                .map(|&interval| (interval, RwLock::new(BarHistory::new(config.bar_history_capacity))))
                .collect(),
        }
    }

    pub(crate) fn tick_snapshot(&self) -> Vec<Tick> {
        self.ticks.read().snapshot()
    }

    pub(crate) fn bar_snapshot(&self, interval: Interval) -> Vec<Bar> {
        self.bars
            .get(&interval)
            .map(|history| history.read().snapshot())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) pair: Pair,
    pub(crate) symbols: FnvHashMap<Symbol, SymbolStore>,
    pub(crate) latest: RwLock<FnvHashMap<AnalyticsSource, AnalyticsRecord>>,
    /// Newest tick timestamp accepted on either leg
    pub(crate) watermark: AtomicI64,
}

impl EngineState {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        let intervals: BTreeSet<Interval> = config.interval_set.iter().copied().collect();
        let symbols = [&config.pair.x, &config.pair.y]
            .into_iter()
            .map(|symbol| (symbol.clone(), SymbolStore::new(symbol, config, &intervals)))
            .collect();

        Self {
            pair: config.pair.clone(),
            symbols,
            latest: RwLock::new(FnvHashMap::default()),
            watermark: AtomicI64::new(i64::MIN),
        }
    }

    pub(crate) fn store(&self, symbol: &str) -> Result<&SymbolStore, EngineError> {
        self.symbols
            .get(symbol)
            .ok_or_else(|| EngineError::UnknownSymbol(Symbol::new(symbol)))
    }

    pub(crate) fn advance_watermark(&self, timestamp: i64) {
        self.watermark.fetch_max(timestamp, Ordering::AcqRel);
    }

    pub(crate) fn watermark(&self) -> Option<i64> {
        match self.watermark.load(Ordering::Acquire) {
            i64::MIN => None,
            watermark => Some(watermark),
        }
    }
}

/// Cheap-clone, read-only access to recent bars, ticks and the latest records.
///
/// Every accessor returns an owned copy; callers never hold engine locks.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    state: Arc<EngineState>,
}

impl QueryHandle {
    pub(crate) fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    pub fn pair(&self) -> &Pair {
        &self.state.pair
    }

    /// Up to `limit` most recent completed bars, oldest first.
    pub fn recent_bars(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Bar>, EngineError> {
        let history = self
            .state
            .store(symbol)?
            .bars
            .get(&interval)
            .ok_or(EngineError::UnknownInterval(interval))?;

        Ok(history.read().last_n(limit))
    }

    /// Up to `limit` most recent buffered ticks, oldest first, duplicates included.
    pub fn recent_ticks(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>, EngineError> {
        let mut ticks = self.state.store(symbol)?.tick_snapshot();
        let start = ticks.len().saturating_sub(limit);
        Ok(ticks.split_off(start))
    }

    /// Most recent record for `pair` computed over `source`.
    ///
    /// `None` until the first cycle for that source completes, or if `pair` is not the
    /// engine's pair. Metrics inside the record may themselves be absent.
    pub fn latest_record(&self, pair: &Pair, source: AnalyticsSource) -> Option<AnalyticsRecord> {
        if pair != &self.state.pair {
            return None;
        }
        self.state.latest.read().get(&source).cloned()
    }

    /// Ticks evicted from `symbol`'s buffer since start.
    pub fn evicted_ticks(&self, symbol: &str) -> Result<u64, EngineError> {
        Ok(self.state.store(symbol)?.ticks.read().evicted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::AnalyticsError, types::Symbol};

    fn state() -> Arc<EngineState> {
        Arc::new(EngineState::new(&EngineConfig::default()))
    }

    #[test]
    fn test_query_unknown_symbol_and_interval() {
        let query = QueryHandle::new(state());

        assert!(matches!(
            query.recent_bars("BTC", Interval::Second1, 10),
            Err(EngineError::UnknownSymbol(_))
        ));
        assert!(matches!(
            query.recent_bars("ES", Interval::Hour1, 10),
            Err(EngineError::UnknownInterval(Interval::Hour1))
        ));
        assert!(query.recent_bars("ES", Interval::Second1, 10).unwrap().is_empty());
    }

    #[test]
    fn test_query_latest_record_keyed_by_pair_and_source() {
        let state = state();
        let query = QueryHandle::new(state.clone());
        let pair = query.pair().clone();

        assert!(query.latest_record(&pair, AnalyticsSource::Ticks).is_none());

        let record = AnalyticsRecord::all_absent(
            1,
            pair.clone(),
            AnalyticsSource::Ticks,
            AnalyticsError::insufficient(2, 0),
        );
        state.latest.write().insert(AnalyticsSource::Ticks, record.clone());

        assert_eq!(query.latest_record(&pair, AnalyticsSource::Ticks), Some(record));
        assert!(query
            .latest_record(&pair, AnalyticsSource::Bars(Interval::Minute1))
            .is_none());

        let other = Pair::new(Symbol::new("BTC"), Symbol::new("ETH"));
        assert!(query.latest_record(&other, AnalyticsSource::Ticks).is_none());
    }

    #[test]
    fn test_recent_ticks_limit() {
        let state = state();
        {
            let mut ticks = state.symbols[&Symbol::new("ES")].ticks.write();
            for ts in 0..5 {
                ticks.push(Tick::new("ES", ts, 1.0)).unwrap();
            }
        }

        let query = QueryHandle::new(state);
        let stamps: Vec<i64> = query
            .recent_ticks("ES", 2)
            .unwrap()
            .iter()
            .map(|tick| tick.timestamp)
            .collect();
        assert_eq!(stamps, vec![3, 4]);
        assert_eq!(query.evicted_ticks("ES").unwrap(), 0);
    }

    #[test]
    fn test_watermark_advances_monotonically() {
        let state = state();
        assert_eq!(state.watermark(), None);

        state.advance_watermark(10);
        state.advance_watermark(5);
        assert_eq!(state.watermark(), Some(10));
    }
}
