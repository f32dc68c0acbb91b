//! Recent-window sizing and slicing.
//!
//! Analytics only ever see the tail of history. Each cycle slices a fresh window from the
//! current snapshot so outputs move as old observations age out.

use crate::align::AlignedSeriesPair;

/// Adaptive window length: `min(configured, available / 2)`.
///
/// Short histories shrink the window rather than failing, and the window never covers
/// more than half of the available aligned samples.
pub fn effective_window(configured: usize, available: usize) -> usize {
    configured.min(available / 2)
}

/// Length of the z-score/correlation sub-window: `max(configured, floor)`, clamped to
/// what is available.
pub fn sub_window(configured: usize, floor: usize, available: usize) -> usize {
    configured.max(floor).min(available)
}

/// Owned snapshot of the most recent aligned observations.
///
/// May be empty when the adaptive size rounds down to zero; the statistics report
/// insufficient samples in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentWindow {
    timestamps: Vec<i64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl RecentWindow {
    /// Slice the tail of `pair` using the adaptive size for `configured`.
    pub fn of(pair: &AlignedSeriesPair, configured: usize) -> Self {
        Self::tail(pair, effective_window(configured, pair.len()))
    }

    /// Slice exactly the last `n` observations (fewer if `pair` is shorter).
    pub fn tail(pair: &AlignedSeriesPair, n: usize) -> Self {
        let start = pair.len().saturating_sub(n);
        Self {
            timestamps: pair.timestamps()[start..].to_vec(),
            x: pair.x()[start..].to_vec(),
            y: pair.y()[start..].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Last `n` x and y prices of this window.
    pub fn recent(&self, n: usize) -> (&[f64], &[f64]) {
        let start = self.len().saturating_sub(n);
        (&self.x[start..], &self.y[start..])
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }
}
