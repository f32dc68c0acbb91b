//! Augmented Dickey-Fuller unit-root test.
//!
//! Fits `Δy_t = α + γ·y_{t−1} + Σ δ_i·Δy_{t−i} + ε` and tests H0: γ = 0 (unit root,
//! non-stationary). The statistic is `γ / se(γ)`; more negative values are stronger
//! evidence of mean reversion. p-values use the MacKinnon (1994) response surface for
//! the constant-only case, critical values the MacKinnon (2010) finite-sample
//! approximations.

use super::{ensure_finite, is_flat};
use crate::{
    error::AnalyticsError,
    record::{CriticalValues, Stationarity},
};
use serde::{Deserialize, Serialize};

/// p-value strictly below this classifies the spread as stationary.
pub const STATIONARITY_P_VALUE: f64 = 0.05;

/// Pivot magnitude below which the normal equations are treated as singular.
const SINGULAR_PIVOT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub critical_values: CriticalValues,
    /// Lagged difference terms in the regression
    pub lags: usize,
    /// Observations the regression ran on
    pub nobs: usize,
    pub stationarity: Stationarity,
}

/// Shortest series the regression with `lags` lagged differences can run on.
pub fn min_adf_len(lags: usize) -> usize {
    lags.saturating_mul(2).saturating_add(4)
}

/// Run the ADF test on `series` with `lags` lagged differences.
///
/// Preconditions, each an explicit failure:
/// - at least `min_samples` values, and enough for the regression to have a residual
///   degree of freedom ([`AnalyticsError::InsufficientSamples`])
/// - finite values ([`AnalyticsError::NonFiniteValue`])
/// - non-zero variance and a non-singular design ([`AnalyticsError::DegenerateInput`])
pub fn adf_test(
    series: &[f64],
    min_samples: usize,
    lags: usize,
) -> Result<AdfResult, AnalyticsError> {
    let params = lags.saturating_add(2);
    // nobs = n - 1 - lags must exceed the parameter count
    let required = min_samples.max(min_adf_len(lags));
    if series.len() < required {
        return Err(AnalyticsError::insufficient(required, series.len()));
    }
    ensure_finite("spread", series)?;
    if is_flat(series) {
        return Err(AnalyticsError::degenerate(
            "spread values are identical, unit-root test undefined",
        ));
    }

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let nobs = diffs.len() - lags;

    // Row for Δy_t (t indexes diffs): [1, y_{t-1}, Δy_{t-1}, ..., Δy_{t-lags}]
    let rows: Vec<Vec<f64>> = (lags..diffs.len())
        .map(|t| {
            let mut row = Vec::with_capacity(params);
            row.push(1.0);
            row.push(series[t]);
            row.extend((1..=lags).map(|i| diffs[t - i]));
            row
        })
        .collect();
    let targets = &diffs[lags..];

    let mut xtx = vec![vec![0.0; params]; params];
    let mut xty = vec![0.0; params];
    for (row, target) in rows.iter().zip(targets) {
        for i in 0..params {
            xty[i] += row[i] * target;
            for j in 0..params {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    let inverse = invert(xtx)?;
    let coefficients: Vec<f64> = inverse
        .iter()
        .map(|inv_row| inv_row.iter().zip(&xty).map(|(a, b)| a * b).sum())
        .collect();

    let sse: f64 = rows
        .iter()
        .zip(targets)
        .map(|(row, target)| {
            let fitted: f64 = row.iter().zip(&coefficients).map(|(a, b)| a * b).sum();
            let residual = target - fitted;
            residual * residual
        })
        .sum();

    let sigma_sq = sse / (nobs - params) as f64;
    let se_gamma = (sigma_sq * inverse[1][1]).sqrt();
    if !se_gamma.is_finite() || se_gamma <= 0.0 {
        return Err(AnalyticsError::degenerate(
            "unit-root regression has zero residual variance",
        ));
    }

    let statistic = coefficients[1] / se_gamma;
    if !statistic.is_finite() {
        return Err(AnalyticsError::non_finite("adf statistic"));
    }

    let p_value = mackinnon_p_value(statistic);
    let stationarity = if p_value < STATIONARITY_P_VALUE {
        Stationarity::Stationary
    } else {
        Stationarity::NonStationary
    };

    Ok(AdfResult {
        statistic,
        p_value,
        critical_values: critical_values(nobs),
        lags,
        nobs,
        stationarity,
    })
}

/// Approximate p-value for an ADF statistic, constant-only regression, one series.
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    const TAU_MAX: f64 = 2.74;
    const TAU_MIN: f64 = -18.83;
    const TAU_STAR: f64 = -1.61;
    const SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
    const LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }

    let coefficients: &[f64] = if statistic <= TAU_STAR {
        &SMALL_P
    } else {
        &LARGE_P
    };

    // Horner evaluation of c0 + c1·τ + c2·τ² (+ c3·τ³)
    let polynomial = coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, coefficient| acc * statistic + coefficient);

    normal_cdf(polynomial)
}

/// 1%, 5% and 10% critical values for a regression on `nobs` observations.
pub fn critical_values(nobs: usize) -> CriticalValues {
    let n = nobs.max(1) as f64;
    let surface = |c: [f64; 4]| c[0] + c[1] / n + c[2] / (n * n) + c[3] / (n * n * n);

    CriticalValues {
        one_percent: surface([-3.43035, -6.5393, -16.786, -79.433]),
        five_percent: surface([-2.86154, -2.8903, -4.234, -40.040]),
        ten_percent: surface([-2.56677, -1.5384, -2.809, 0.0]),
    }
}

/// Gauss-Jordan inverse with partial pivoting.
fn invert(mut matrix: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, AnalyticsError> {
    let size = matrix.len();
    let mut inverse: Vec<Vec<f64>> = (0..size)
        .map(|i| (0..size).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    let scale = matrix
        .iter()
        .flatten()
        .fold(1.0_f64, |acc, value| acc.max(value.abs()));

    for column in 0..size {
        let pivot_row = (column..size)
            .max_by(|&a, &b| matrix[a][column].abs().total_cmp(&matrix[b][column].abs()))
            .unwrap_or(column);

        if matrix[pivot_row][column].abs() <= SINGULAR_PIVOT * scale {
            return Err(AnalyticsError::degenerate(
                "unit-root design matrix is singular",
            ));
        }

        matrix.swap(column, pivot_row);
        inverse.swap(column, pivot_row);

        let pivot = matrix[column][column];
        for j in 0..size {
            matrix[column][j] /= pivot;
            inverse[column][j] /= pivot;
        }

        for row in 0..size {
            if row == column {
                continue;
            }
            let factor = matrix[row][column];
            if factor == 0.0 {
                continue;
            }
            for j in 0..size {
                let (pivot_value, inverse_value) = (matrix[column][j], inverse[column][j]);
                matrix[row][j] -= factor * pivot_value;
                inverse[row][j] -= factor * inverse_value;
            }
        }
    }

    Ok(inverse)
}

/// Standard normal CDF via the complementary error function.
fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Chebyshev approximation of erfc, fractional error below 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
            .exp();

    if x >= 0.0 { ans } else { 2.0 - ans }
}
