use super::{ensure_finite, ensure_len, is_flat, mean};
use crate::error::AnalyticsError;

/// Pearson correlation coefficient in `[-1.0, 1.0]`.
///
/// Callers pass the recent sub-window of aligned prices; the result is recomputed from
/// those slices every call.
pub fn correlation(x: &[f64], y: &[f64]) -> Result<f64, AnalyticsError> {
    if x.len() != y.len() {
        return Err(AnalyticsError::degenerate(format!(
            "correlation inputs differ in length: x {}, y {}",
            x.len(),
            y.len()
        )));
    }
    ensure_len(2, x)?;
    ensure_finite("correlation x", x)?;
    ensure_finite("correlation y", y)?;

    if is_flat(x) || is_flat(y) {
        return Err(AnalyticsError::degenerate(
            "correlation input has zero variance",
        ));
    }

    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;

    for (xi, yi) in x.iter().zip(y) {
        let diff_x = xi - mean_x;
        let diff_y = yi - mean_y;
        cov += diff_x * diff_y;
        var_x += diff_x * diff_x;
        var_y += diff_y * diff_y;
    }

    Ok((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}
