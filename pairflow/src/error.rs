use crate::types::{Interval, Symbol};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable conditions raised while ingesting ticks or computing analytics.
///
/// None of these abort an analytics cycle or an ingestion path: a failed metric is
/// surfaced as [`Metric::Absent`](crate::record::Metric::Absent) carrying the error as
/// its reason, and a rejected tick is logged and dropped.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyticsError {
    #[error("insufficient samples: required {required}, available {available}")]
    InsufficientSamples { required: usize, available: usize },

    #[error("degenerate input: {detail}")]
    DegenerateInput { detail: String },

    #[error("no overlapping timestamps between series of {x_len} and {y_len} observations")]
    InsufficientOverlap { x_len: usize, y_len: usize },

    #[error("non-finite value in {series}")]
    NonFiniteValue { series: String },

    #[error(
        "\
        IngestionOutOfOrder: {symbol} tick at {timestamp} regresses behind last accepted \
        timestamp {last_timestamp} \
    "
    )]
    IngestionOutOfOrder {
        symbol: Symbol,
        timestamp: i64,
        last_timestamp: i64,
    },
}

impl AnalyticsError {
    pub(crate) fn insufficient(required: usize, available: usize) -> Self {
        Self::InsufficientSamples {
            required,
            available,
        }
    }

    pub(crate) fn degenerate(detail: impl Into<String>) -> Self {
        Self::DegenerateInput {
            detail: detail.into(),
        }
    }

    pub(crate) fn non_finite(series: impl Into<String>) -> Self {
        Self::NonFiniteValue {
            series: series.into(),
        }
    }

    /// Determine if an error should stop the component that produced it.
    ///
    /// Every member of the taxonomy is local to one metric or one tick, so this is
    /// always `false`. Fatal conditions are reported through [`ConfigError`] at startup.
    pub fn is_terminal(&self) -> bool {
        false
    }
}

/// Contradictory configuration, fatal at startup.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("interval_set must contain at least one interval")]
    EmptyIntervalSet,

    #[error("analytics source {name} is not in interval_set")]
    UnknownSource { name: String },

    #[error("pair symbols must differ, both are {0}")]
    DuplicateSymbol(Symbol),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("adf_lags {lags} needs more samples than default_window_size {window}")]
    AdfLagsTooLarge { lags: usize, window: usize },

    #[error("alert bound for {metric} must be finite")]
    NonFiniteBound { metric: &'static str },
}

/// Failures of an [`AnalyticsSink`](crate::sink::AnalyticsSink) backend.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// Errors returned by [`PairEngine`](crate::engine::PairEngine) and its handles.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("symbol {0} is not part of the configured pair")]
    UnknownSymbol(Symbol),

    #[error("interval {0} is not in the configured interval set")]
    UnknownInterval(Interval),

    #[error("engine has stopped, {0} ingestion channel is closed")]
    Stopped(Symbol),
}
