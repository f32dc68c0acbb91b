//! Spread construction and rolling z-score.

use super::{ensure_finite, ensure_len, is_flat, mean, sample_std};
use crate::{error::AnalyticsError, window::sub_window};

/// `spread_t = y_t - beta * x_t` for every aligned index.
pub fn spread_series(x: &[f64], y: &[f64], beta: f64) -> Vec<f64> {
    x.iter().zip(y).map(|(xi, yi)| yi - beta * xi).collect()
}

/// Z-score of the latest spread against the recent sub-window it ends.
///
/// The sub-window is the last `max(zscore_window, floor)` spread values, clamped to the
/// spread length. High |z| = significant divergence from normal.
pub fn z_score(spread: &[f64], zscore_window: usize, floor: usize) -> Result<f64, AnalyticsError> {
    let len = sub_window(zscore_window, floor, spread.len());
    let recent = &spread[spread.len() - len..];

    ensure_len(2, recent)?;
    ensure_finite("spread", recent)?;

    if is_flat(recent) {
        return Err(AnalyticsError::degenerate(format!(
            "spread has zero standard deviation over {len} samples"
        )));
    }

    let current = recent[recent.len() - 1];
    Ok((current - mean(recent)) / sample_std(recent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_series() {
        let spread = spread_series(&[1.0, 2.0, 3.0], &[3.0, 5.0, 8.0], 2.0);
        assert_eq!(spread, vec![1.0, 1.0, 2.0]);
    }

    #[test]
    fn test_z_score_sample_std() {
        let z = z_score(&[1.0, 2.0, 3.0, 4.0, 5.0], 20, 5).unwrap();
        assert!((z - 1.264_911_064).abs() < 1e-6);
    }

    #[test]
    fn test_z_score_uses_only_recent_sub_window() {
        // Huge early outlier must not leak into a 5 sample sub-window
        let mut spread = vec![1_000.0];
        spread.extend([1.0, 2.0, 3.0, 4.0, 5.0]);

        let z = z_score(&spread, 5, 5).unwrap();
        assert!((z - 1.264_911_064).abs() < 1e-6);
    }

    #[test]
    fn test_z_score_floor_widens_sub_window() {
        let spread = [1.0, 2.0, 3.0, 4.0, 5.0];
        // Configured 2 is raised to the floor of 5
        let widened = z_score(&spread, 2, 5).unwrap();
        assert!((widened - 1.264_911_064).abs() < 1e-6);
    }

    #[test]
    fn test_z_score_flat_spread_is_degenerate() {
        let result = z_score(&[1.0; 6], 20, 5);
        assert!(matches!(result, Err(AnalyticsError::DegenerateInput { .. })));
    }

    #[test]
    fn test_z_score_insufficient_and_non_finite() {
        assert_eq!(
            z_score(&[1.0], 20, 5),
            Err(AnalyticsError::insufficient(2, 1))
        );
        assert!(matches!(
            z_score(&[1.0, f64::NAN, 2.0], 20, 5),
            Err(AnalyticsError::NonFiniteValue { .. })
        ));
    }

    #[test]
    fn test_z_score_changes_when_window_slides() {
        let series: Vec<f64> = (0..30).map(|i| ((i * 7) % 11) as f64).collect();

        let before = z_score(&series[..25], 20, 5).unwrap();
        let again = z_score(&series[..25], 20, 5).unwrap();
        let after = z_score(&series[1..26], 20, 5).unwrap();

        assert_eq!(before.to_bits(), again.to_bits());
        assert_ne!(before.to_bits(), after.to_bits());
    }
}
