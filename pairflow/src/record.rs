//! Output records of the analytics cycle.

use crate::{
    error::AnalyticsError,
    types::{AnalyticsSource, Pair},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// One metric of an [`AnalyticsRecord`]: either freshly computed this cycle or absent
/// with the reason it could not be computed.
///
/// Serialised with a `status` tag so consumers never confuse an absent value with zero:
/// `{"status":"computed","value":0.0}` vs `{"status":"absent","reason":{...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Metric {
    Computed { value: f64 },
    Absent { reason: AnalyticsError },
}

impl Metric {
    pub fn computed(value: f64) -> Self {
        Self::Computed { value }
    }

    pub fn absent(reason: AnalyticsError) -> Self {
        Self::Absent { reason }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Computed { value } => Some(*value),
            Metric::Absent { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&AnalyticsError> {
        match self {
            Metric::Computed { .. } => None,
            Metric::Absent { reason } => Some(reason),
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Metric::Computed { .. })
    }
}

impl From<Result<f64, AnalyticsError>> for Metric {
    fn from(result: Result<f64, AnalyticsError>) -> Self {
        match result {
            Ok(value) => Metric::computed(value),
            Err(reason) => Metric::absent(reason),
        }
    }
}

/// Unit-root classification of the spread. p-value below
/// [`STATIONARITY_P_VALUE`](crate::stats::stationarity::STATIONARITY_P_VALUE) is stationary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Stationarity {
    #[display("stationary")]
    Stationary,
    #[display("non-stationary")]
    NonStationary,
}

/// ADF critical values for the sample size the test ran on.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CriticalValues {
    pub one_percent: f64,
    pub five_percent: f64,
    pub ten_percent: f64,
}

/// Result of one analytics cycle for a pair and source.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnalyticsRecord {
    /// Cycle time in milliseconds
    pub timestamp: i64,
    pub pair: Pair,
    pub source: AnalyticsSource,
    /// Timestamp of the newest aligned observation the cycle used
    pub as_of: Option<i64>,
    /// Effective recent-window length used by this cycle
    pub window_len: usize,
    pub hedge_ratio: Metric,
    pub intercept: Metric,
    pub spread_value: Metric,
    pub z_score: Metric,
    pub rolling_correlation: Metric,
    pub adf_statistic: Metric,
    pub adf_p_value: Metric,
    pub adf_critical_values: Option<CriticalValues>,
    pub stationarity: Option<Stationarity>,
}

impl AnalyticsRecord {
    /// Record with every metric absent for the same reason, used when a cycle fails
    /// before any metric can run (eg/ no overlapping timestamps).
    pub fn all_absent(
        timestamp: i64,
        pair: Pair,
        source: AnalyticsSource,
        reason: AnalyticsError,
    ) -> Self {
        let absent = Metric::absent(reason);
        Self {
            timestamp,
            pair,
            source,
            as_of: None,
            window_len: 0,
            hedge_ratio: absent.clone(),
            intercept: absent.clone(),
            spread_value: absent.clone(),
            z_score: absent.clone(),
            rolling_correlation: absent.clone(),
            adf_statistic: absent.clone(),
            adf_p_value: absent,
            adf_critical_values: None,
            stationarity: None,
        }
    }
}

/// Metric an alert fired on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// |z-score| reached the bound
    #[display("z_score")]
    ZScore,
    /// Rolling correlation fell below the bound
    #[display("correlation_breakdown")]
    CorrelationBreakdown,
    /// ADF p-value rose to the bound, the spread no longer looks mean-reverting
    #[display("stationarity_loss")]
    StationarityLoss,
}

/// Threshold breach detected on an [`AnalyticsRecord`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertEvent {
    pub timestamp: i64,
    pub pair: Pair,
    pub source: AnalyticsSource,
    pub kind: AlertKind,
    pub message: String,
    pub metric_value: f64,
    pub threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;

    #[test]
    fn test_metric_absent_is_distinct_from_zero() {
        let zero = Metric::computed(0.0);
        let absent = Metric::absent(AnalyticsError::degenerate("zero variance"));

        assert_ne!(zero, absent);
        assert_eq!(zero.value(), Some(0.0));
        assert_eq!(absent.value(), None);

        let zero_json = serde_json::to_value(&zero).unwrap();
        let absent_json = serde_json::to_value(&absent).unwrap();
        assert_eq!(zero_json["status"], "computed");
        assert_eq!(zero_json["value"], 0.0);
        assert_eq!(absent_json["status"], "absent");
        assert_eq!(absent_json["reason"]["kind"], "degenerate_input");
    }

    #[test]
    fn test_all_absent_record() {
        let pair = Pair::new(Symbol::new("ES"), Symbol::new("NQ"));
        let reason = AnalyticsError::InsufficientOverlap { x_len: 2, y_len: 2 };
        let record = AnalyticsRecord::all_absent(1, pair, AnalyticsSource::Ticks, reason.clone());

        for metric in [
            &record.hedge_ratio,
            &record.spread_value,
            &record.z_score,
            &record.rolling_correlation,
            &record.adf_statistic,
            &record.adf_p_value,
        ] {
            assert_eq!(metric.reason(), Some(&reason));
        }
        assert_eq!(record.window_len, 0);
        assert!(record.stationarity.is_none());

        let json = serde_json::to_string(&record).unwrap();
        let back: AnalyticsRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
