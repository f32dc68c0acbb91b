//! Hedge ratio via ordinary least squares of y on x with intercept.

use super::{VARIANCE_EPSILON, ensure_finite, mean, sum_sq_dev};
use crate::error::AnalyticsError;
use serde::{Deserialize, Serialize};

/// Fewest aligned samples a regression is attempted on.
pub const MIN_REGRESSION_SAMPLES: usize = 2;

/// OLS fit `y = intercept + beta * x`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct HedgeRegression {
    /// Hedge ratio
    pub beta: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Regress `y` on `x`.
///
/// Fails with [`AnalyticsError::InsufficientSamples`] below
/// [`MIN_REGRESSION_SAMPLES`], [`AnalyticsError::NonFiniteValue`] on NaN/inf input and
/// [`AnalyticsError::DegenerateInput`] when `x` has zero variance or lengths differ.
pub fn hedge_ratio(x: &[f64], y: &[f64]) -> Result<HedgeRegression, AnalyticsError> {
    if x.len() != y.len() {
        return Err(AnalyticsError::degenerate(format!(
            "regression inputs differ in length: x {}, y {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < MIN_REGRESSION_SAMPLES {
        return Err(AnalyticsError::insufficient(MIN_REGRESSION_SAMPLES, x.len()));
    }
    ensure_finite("regression x", x)?;
    ensure_finite("regression y", y)?;

    let mean_x = mean(x);
    let mean_y = mean(y);
    let var_x = sum_sq_dev(x, mean_x);
    let var_y = sum_sq_dev(y, mean_y);

    let scale = mean_x.abs().max(1.0);
    if var_x / x.len() as f64 <= VARIANCE_EPSILON * scale * scale {
        return Err(AnalyticsError::degenerate("x has zero variance in window"));
    }

    let cov: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (xi - mean_x) * (yi - mean_y))
        .sum();

    let beta = cov / var_x;
    let intercept = mean_y - beta * mean_x;
    let r_squared = if var_y > 0.0 {
        (cov * cov / (var_x * var_y)).min(1.0)
    } else {
        // y is flat, the line explains it perfectly
        1.0
    };

    Ok(HedgeRegression {
        beta,
        intercept,
        r_squared,
    })
}
