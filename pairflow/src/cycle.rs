//! One end-to-end analytics pass: align, window, compute, emit.
//!
//! A cycle is a pure function of the snapshot it is handed. Nothing computed in one
//! cycle is carried into the next, so a record always reflects the current tail of
//! history rather than a cached prior value.

use crate::{
    alert::{AlertThresholds, evaluate},
    align::align,
    error::AnalyticsError,
    record::{AlertEvent, AnalyticsRecord, Metric},
    stats::{
        correlation::correlation,
        regression::hedge_ratio,
        spread::{spread_series, z_score},
        stationarity::adf_test,
    },
    types::{AnalyticsSource, Observation, Pair},
    window::{RecentWindow, sub_window},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Window and test sizing a cycle runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnalyticsParams {
    pub window_size: usize,
    pub zscore_window: usize,
    pub zscore_floor: usize,
    pub min_adf_samples: usize,
    pub adf_lags: usize,
}

impl Default for AnalyticsParams {
    fn default() -> Self {
        Self {
            window_size: 100,
            zscore_window: 20,
            zscore_floor: 5,
            min_adf_samples: 10,
            adf_lags: 1,
        }
    }
}

/// Immutable copy of both legs' observations taken at the start of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSnapshot<O> {
    pub x: Vec<O>,
    pub y: Vec<O>,
}

impl<O> PairSnapshot<O> {
    pub fn new(x: Vec<O>, y: Vec<O>) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutput {
    pub record: AnalyticsRecord,
    pub alerts: Vec<AlertEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CycleStage {
    Idle,
    Aligning,
    Windowing,
    Computing,
    Emitting,
}

/// Orchestrates the statistics for one pair and source.
#[derive(Debug, Clone)]
pub struct AnalyticsCycle {
    pair: Pair,
    source: AnalyticsSource,
    params: AnalyticsParams,
    thresholds: AlertThresholds,
    stage: CycleStage,
}

impl AnalyticsCycle {
    pub fn new(
        pair: Pair,
        source: AnalyticsSource,
        params: AnalyticsParams,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            pair,
            source,
            params,
            thresholds,
            stage: CycleStage::Idle,
        }
    }

    pub fn source(&self) -> AnalyticsSource {
        self.source
    }

    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    /// Run one cycle over `snapshot`, stamping the record with `now_ms`.
    ///
    /// Never fails: any stage failure goes straight to emitting a record whose affected
    /// metrics are absent with the reason.
    pub fn run<O>(&mut self, snapshot: &PairSnapshot<O>, now_ms: i64) -> CycleOutput
    where
        O: Observation + Clone,
    {
        self.transition(CycleStage::Aligning);
        let record = match align(&snapshot.x, &snapshot.y) {
            Ok(aligned) => {
                self.transition(CycleStage::Windowing);
                let window = RecentWindow::of(&aligned, self.params.window_size);

                self.transition(CycleStage::Computing);
                self.compute(&window, now_ms)
            }
            Err(error) => {
                debug!(pair = %self.pair, source = %self.source, %error, "alignment failed");
                AnalyticsRecord::all_absent(now_ms, self.pair.clone(), self.source, error)
            }
        };

        self.transition(CycleStage::Emitting);
        let alerts = evaluate(&record, &self.thresholds);

        self.transition(CycleStage::Idle);
        CycleOutput { record, alerts }
    }

    fn compute(&self, window: &RecentWindow, now_ms: i64) -> AnalyticsRecord {
        let params = &self.params;
        let sub_len = sub_window(params.zscore_window, params.zscore_floor, window.len());

        let (recent_x, recent_y) = window.recent(sub_len);
        let rolling_correlation = self.metric("rolling_correlation", correlation(recent_x, recent_y));

        let regression = match hedge_ratio(window.x(), window.y()) {
            Ok(regression) => regression,
            Err(error) => {
                // Everything downstream of the hedge ratio shares its reason
                debug!(pair = %self.pair, source = %self.source, %error, "hedge ratio absent");
                return AnalyticsRecord {
                    as_of: window.last_timestamp(),
                    window_len: window.len(),
                    rolling_correlation,
                    ..AnalyticsRecord::all_absent(now_ms, self.pair.clone(), self.source, error)
                };
            }
        };

        let spread = spread_series(window.x(), window.y(), regression.beta);
        let spread_value = match spread.last() {
            Some(&value) if value.is_finite() => Metric::computed(value),
            Some(_) => Metric::absent(AnalyticsError::non_finite("spread")),
            None => Metric::absent(AnalyticsError::insufficient(1, 0)),
        };
        let z_score = self.metric(
            "z_score",
            z_score(&spread, params.zscore_window, params.zscore_floor),
        );

        let (adf_statistic, adf_p_value, adf_critical_values, stationarity) =
            match adf_test(&spread, params.min_adf_samples, params.adf_lags) {
                Ok(adf) => (
                    Metric::computed(adf.statistic),
                    Metric::computed(adf.p_value),
                    Some(adf.critical_values),
                    Some(adf.stationarity),
                ),
                Err(error) => {
                    debug!(pair = %self.pair, source = %self.source, %error, "stationarity test skipped");
                    (Metric::absent(error.clone()), Metric::absent(error), None, None)
                }
            };

        AnalyticsRecord {
            timestamp: now_ms,
            pair: self.pair.clone(),
            source: self.source,
            as_of: window.last_timestamp(),
            window_len: window.len(),
            hedge_ratio: Metric::computed(regression.beta),
            intercept: Metric::computed(regression.intercept),
            spread_value,
            z_score,
            rolling_correlation,
            adf_statistic,
            adf_p_value,
            adf_critical_values,
            stationarity,
        }
    }

    fn metric(&self, name: &'static str, result: Result<f64, AnalyticsError>) -> Metric {
        if let Err(error) = &result {
            debug!(pair = %self.pair, source = %self.source, metric = name, %error, "metric absent");
        }
        Metric::from(result)
    }

    fn transition(&mut self, next: CycleStage) {
        trace!(pair = %self.pair, source = %self.source, from = %self.stage, to = %next, "cycle stage");
        self.stage = next;
    }
}
