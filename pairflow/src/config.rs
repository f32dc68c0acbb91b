//! Engine configuration.
//!
//! Built from [`Default`] plus `with_*` setters, deserialised with serde, or read from
//! `PAIRFLOW_*` environment variables via [`EngineConfig::from_env`]. Contradictions are
//! rejected by [`EngineConfig::validate`] before anything is spawned.

use crate::{
    alert::{AlertRule, AlertThresholds},
    cycle::AnalyticsParams,
    error::ConfigError,
    stats::stationarity::min_adf_len,
    types::{AnalyticsSource, Interval, Pair, Symbol},
};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// What starts an analytics cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Fixed cadence, independent of tick arrival
    Timer(Duration),
    /// Every accepted tick, coalesced while a cycle is running
    PerTick,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pair: Pair,
    /// Recent-window length before the adaptive halving rule
    pub default_window_size: usize,
    pub zscore_window: usize,
    /// Lower bound on the z-score/correlation sub-window
    pub zscore_floor: usize,
    pub min_adf_samples: usize,
    pub adf_lags: usize,
    /// Bar widths resampled and retained per symbol
    pub interval_set: Vec<Interval>,
    pub analytics_source: AnalyticsSource,
    pub trigger: Trigger,
    /// Ticks retained per symbol
    pub buffer_capacity: usize,
    /// Completed bars retained per symbol and interval
    pub bar_history_capacity: usize,
    /// How far behind the newest accepted timestamp a tick may arrive
    pub out_of_order_tolerance_ms: u64,
    /// Close a leg's open bar during a lull once the other leg has moved this far past
    /// the bar end. `None` closes bars only on the leg's own later ticks.
    pub bar_close_lateness_ms: Option<u64>,
    pub alert_thresholds: AlertThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pair: Pair::new(Symbol::new("ES"), Symbol::new("NQ")),
            default_window_size: 100,
            zscore_window: 20,
            zscore_floor: 5,
            min_adf_samples: 10,
            adf_lags: 1,
            interval_set: vec![Interval::Second1, Interval::Minute1, Interval::Minute5],
            analytics_source: AnalyticsSource::Ticks,
            trigger: Trigger::Timer(Duration::from_secs(1)),
            buffer_capacity: 10_000,
            bar_history_capacity: 1_000,
            out_of_order_tolerance_ms: 0,
            bar_close_lateness_ms: None,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration for `pair` with default settings.
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            ..Default::default()
        }
    }

    pub fn with_window_size(mut self, size: usize) -> Self {
        self.default_window_size = size;
        self
    }

    pub fn with_zscore_window(mut self, window: usize, floor: usize) -> Self {
        self.zscore_window = window;
        self.zscore_floor = floor;
        self
    }

    pub fn with_adf(mut self, min_samples: usize, lags: usize) -> Self {
        self.min_adf_samples = min_samples;
        self.adf_lags = lags;
        self
    }

    pub fn with_intervals(mut self, intervals: impl IntoIterator<Item = Interval>) -> Self {
        self.interval_set = intervals.into_iter().collect();
        self
    }

    pub fn with_source(mut self, source: AnalyticsSource) -> Self {
        self.analytics_source = source;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_bar_history_capacity(mut self, capacity: usize) -> Self {
        self.bar_history_capacity = capacity;
        self
    }

    pub fn with_out_of_order_tolerance(mut self, tolerance_ms: u64) -> Self {
        self.out_of_order_tolerance_ms = tolerance_ms;
        self
    }

    pub fn with_bar_close_lateness(mut self, lateness_ms: u64) -> Self {
        self.bar_close_lateness_ms = Some(lateness_ms);
        self
    }

    pub fn with_alert_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.alert_thresholds = thresholds;
        self
    }

    /// Sizing handed to each [`AnalyticsCycle`](crate::cycle::AnalyticsCycle).
    pub fn analytics_params(&self) -> AnalyticsParams {
        AnalyticsParams {
            window_size: self.default_window_size,
            zscore_window: self.zscore_window,
            zscore_floor: self.zscore_floor,
            min_adf_samples: self.min_adf_samples,
            adf_lags: self.adf_lags,
        }
    }

    /// Tolerance as a signed millisecond offset.
    pub fn tolerance_ms(&self) -> i64 {
        i64::try_from(self.out_of_order_tolerance_ms).unwrap_or(i64::MAX)
    }

    pub fn bar_close_lateness(&self) -> Option<i64> {
        self.bar_close_lateness_ms
            .map(|lateness| i64::try_from(lateness).unwrap_or(i64::MAX))
    }

    /// Reject contradictory settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("default_window_size", self.default_window_size),
            ("zscore_window", self.zscore_window),
            ("zscore_floor", self.zscore_floor),
            ("min_adf_samples", self.min_adf_samples),
            ("buffer_capacity", self.buffer_capacity),
            ("bar_history_capacity", self.bar_history_capacity),
        ];
        if let Some((field, _)) = sizes.into_iter().find(|(_, size)| *size == 0) {
            return Err(ConfigError::NonPositive { field });
        }
        if min_adf_len(self.adf_lags) > self.default_window_size {
            return Err(ConfigError::AdfLagsTooLarge {
                lags: self.adf_lags,
                window: self.default_window_size,
            });
        }
        if self.trigger == Trigger::Timer(Duration::ZERO) {
            return Err(ConfigError::NonPositive { field: "trigger" });
        }
        if self.pair.x == self.pair.y {
            return Err(ConfigError::DuplicateSymbol(self.pair.x.clone()));
        }
        if self.interval_set.is_empty() {
            return Err(ConfigError::EmptyIntervalSet);
        }
        if let AnalyticsSource::Bars(interval) = self.analytics_source
            && !self.interval_set.contains(&interval)
        {
            return Err(ConfigError::UnknownSource {
                name: interval.to_string(),
            });
        }
        self.alert_thresholds.validate()
    }

    /// Defaults overridden by `PAIRFLOW_*` environment variables.
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `PAIRFLOW_SYMBOL_X`, `PAIRFLOW_SYMBOL_Y` | pair legs, y is regressed on x |
    /// | `PAIRFLOW_WINDOW_SIZE` | recent-window length |
    /// | `PAIRFLOW_ZSCORE_WINDOW`, `PAIRFLOW_ZSCORE_FLOOR` | z-score sub-window |
    /// | `PAIRFLOW_MIN_ADF_SAMPLES`, `PAIRFLOW_ADF_LAGS` | stationarity test |
    /// | `PAIRFLOW_INTERVALS` | comma separated, eg/ `1s,1m,5m` |
    /// | `PAIRFLOW_SOURCE` | `ticks` or an interval |
    /// | `PAIRFLOW_TRIGGER` | `tick`, or a timer period in milliseconds |
    /// | `PAIRFLOW_BUFFER_CAPACITY`, `PAIRFLOW_BAR_HISTORY` | retention |
    /// | `PAIRFLOW_OUT_OF_ORDER_TOLERANCE_MS` | ingestion regression tolerance |
    /// | `PAIRFLOW_BAR_CLOSE_LATENESS_MS` | cross-leg bar closing allowance, or `off` |
    /// | `PAIRFLOW_ALERT_Z`, `PAIRFLOW_ALERT_CORRELATION`, `PAIRFLOW_ALERT_ADF_P` | bound, or `off` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`Self::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        if let Some(x) = env.raw("PAIRFLOW_SYMBOL_X") {
            config.pair.x = Symbol::new(x);
        }
        if let Some(y) = env.raw("PAIRFLOW_SYMBOL_Y") {
            config.pair.y = Symbol::new(y);
        }
        env.parse("PAIRFLOW_WINDOW_SIZE", &mut config.default_window_size)?;
        env.parse("PAIRFLOW_ZSCORE_WINDOW", &mut config.zscore_window)?;
        env.parse("PAIRFLOW_ZSCORE_FLOOR", &mut config.zscore_floor)?;
        env.parse("PAIRFLOW_MIN_ADF_SAMPLES", &mut config.min_adf_samples)?;
        env.parse("PAIRFLOW_ADF_LAGS", &mut config.adf_lags)?;
        env.parse("PAIRFLOW_SOURCE", &mut config.analytics_source)?;
        env.parse("PAIRFLOW_BUFFER_CAPACITY", &mut config.buffer_capacity)?;
        env.parse("PAIRFLOW_BAR_HISTORY", &mut config.bar_history_capacity)?;
        env.parse(
            "PAIRFLOW_OUT_OF_ORDER_TOLERANCE_MS",
            &mut config.out_of_order_tolerance_ms,
        )?;

        if let Some(raw) = env.raw("PAIRFLOW_BAR_CLOSE_LATENESS_MS") {
            config.bar_close_lateness_ms = match raw.trim() {
                "off" => None,
                lateness => Some(
                    lateness
                        .parse()
                        .map_err(|_| env.invalid("PAIRFLOW_BAR_CLOSE_LATENESS_MS", &raw))?,
                ),
            };
        }

        if let Some(raw) = env.raw("PAIRFLOW_INTERVALS") {
            config.interval_set = raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse()
                        .map_err(|_| env.invalid("PAIRFLOW_INTERVALS", &raw))
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(raw) = env.raw("PAIRFLOW_TRIGGER") {
            config.trigger = match raw.as_str() {
                "tick" => Trigger::PerTick,
                period => period
                    .parse()
                    .map(|ms| Trigger::Timer(Duration::from_millis(ms)))
                    .map_err(|_| env.invalid("PAIRFLOW_TRIGGER", &raw))?,
            };
        }

        let thresholds = &mut config.alert_thresholds;
        env.rule("PAIRFLOW_ALERT_Z", &mut thresholds.z_score)?;
        env.rule("PAIRFLOW_ALERT_CORRELATION", &mut thresholds.correlation)?;
        env.rule("PAIRFLOW_ALERT_ADF_P", &mut thresholds.adf_p_value)?;

        Ok(config)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn invalid(&self, key: &'static str, value: &str) -> ConfigError {
        ConfigError::InvalidEnv {
            key,
            value: value.to_string(),
        }
    }

    fn parse<T: FromStr>(&self, key: &'static str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(raw) = self.raw(key) {
            *target = raw.trim().parse().map_err(|_| self.invalid(key, &raw))?;
        }
        Ok(())
    }

    fn rule(&self, key: &'static str, target: &mut AlertRule) -> Result<(), ConfigError> {
        match self.raw(key).as_deref().map(str::trim) {
            None => {}
            Some("off") => target.enabled = false,
            Some(raw) => {
                let bound = raw.parse().map_err(|_| self.invalid(key, raw))?;
                *target = AlertRule::enabled(bound);
            }
        }
        Ok(())
    }
}
