//! Pair statistics computed over recent-window snapshots.
//!
//! Every function here is a pure function of its slice arguments: no hidden state, no
//! caching between calls, so recomputing on an unchanged window is bit-identical and a
//! slid window always yields fresh values.

use crate::error::AnalyticsError;

pub mod correlation;
pub mod regression;
pub mod spread;
pub mod stationarity;

/// Variance at or below this is treated as zero.
pub const VARIANCE_EPSILON: f64 = 1e-12;

pub(crate) fn ensure_finite(series: &str, values: &[f64]) -> Result<(), AnalyticsError> {
    if values.iter().all(|value| value.is_finite()) {
        Ok(())
    } else {
        Err(AnalyticsError::non_finite(series))
    }
}

pub(crate) fn ensure_len(required: usize, values: &[f64]) -> Result<(), AnalyticsError> {
    if values.len() < required {
        Err(AnalyticsError::insufficient(required, values.len()))
    } else {
        Ok(())
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sum of squared deviations from the mean.
pub(crate) fn sum_sq_dev(values: &[f64], mean: f64) -> f64 {
    values
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum()
}

/// Sample standard deviation (n - 1 denominator). Requires at least 2 values.
pub(crate) fn sample_std(values: &[f64]) -> f64 {
    let mean = mean(values);
    (sum_sq_dev(values, mean) / (values.len() - 1) as f64).sqrt()
}

/// Zero-variance check relative to the magnitude of the data, so large price levels with
/// tiny float noise still count as flat.
pub(crate) fn is_flat(values: &[f64]) -> bool {
    let mean = mean(values);
    let scale = values.iter().fold(1.0_f64, |acc, value| acc.max(value.abs()));
    sum_sq_dev(values, mean) / values.len() as f64 <= VARIANCE_EPSILON * scale * scale
}
