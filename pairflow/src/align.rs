//! Deduplication and cross-series timestamp alignment.
//!
//! Both operations are pure transforms over immutable snapshots.

use crate::{error::AnalyticsError, types::Observation};
use itertools::{EitherOrBoth, Itertools};
use std::collections::BTreeMap;

/// Collapse observations sharing a timestamp, keeping the last-arrived one.
///
/// Output is sorted ascending by timestamp. Idempotent: deduplicating the output again
/// yields the same sequence.
pub fn dedup<O>(observations: &[O]) -> Vec<O>
where
    O: Observation + Clone,
{
    observations
        .iter()
        .map(|observation| (observation.timestamp(), observation.clone()))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}

/// Two price series restricted to their common timestamps.
///
/// Invariant: non-empty, `timestamps`, `x` and `y` have equal length and timestamps are
/// strictly ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeriesPair {
    timestamps: Vec<i64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl AlignedSeriesPair {
    /// Build from pre-aligned columns.
    ///
    /// Fails with [`AnalyticsError::InsufficientOverlap`] on empty input and with
    /// [`AnalyticsError::DegenerateInput`] when lengths differ or timestamps are not
    /// strictly ascending.
    pub fn from_columns(
        timestamps: Vec<i64>,
        x: Vec<f64>,
        y: Vec<f64>,
    ) -> Result<Self, AnalyticsError> {
        if timestamps.is_empty() || x.is_empty() || y.is_empty() {
            return Err(AnalyticsError::InsufficientOverlap {
                x_len: x.len(),
                y_len: y.len(),
            });
        }
        if timestamps.len() != x.len() || x.len() != y.len() {
            return Err(AnalyticsError::degenerate(format!(
                "column lengths differ: timestamps {}, x {}, y {}",
                timestamps.len(),
                x.len(),
                y.len()
            )));
        }
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalyticsError::degenerate(
                "timestamps are not strictly ascending",
            ));
        }

        Ok(Self { timestamps, x, y })
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

    /// Timestamp of the newest aligned observation.
    pub fn last_timestamp(&self) -> i64 {
        // Non-empty by construction
        self.timestamps[self.timestamps.len() - 1]
    }
}

/// Deduplicate both series and intersect their timestamp sets.
///
/// Series with no common timestamp (including an empty side) yield
/// [`AnalyticsError::InsufficientOverlap`], never an empty pair.
pub fn align<X, Y>(x: &[X], y: &[Y]) -> Result<AlignedSeriesPair, AnalyticsError>
where
    X: Observation + Clone,
    Y: Observation + Clone,
{
    let x_dedup = dedup(x);
    let y_dedup = dedup(y);

    let (timestamps, (x_prices, y_prices)): (Vec<i64>, (Vec<f64>, Vec<f64>)) = x_dedup
        .iter()
        .merge_join_by(y_dedup.iter(), |a, b| a.timestamp().cmp(&b.timestamp()))
        .filter_map(|joined| match joined {
            EitherOrBoth::Both(a, b) => Some((a.timestamp(), (a.price(), b.price()))),
            EitherOrBoth::Left(_) | EitherOrBoth::Right(_) => None,
        })
        .unzip();

    if timestamps.is_empty() {
        return Err(AnalyticsError::InsufficientOverlap {
            x_len: x_dedup.len(),
            y_len: y_dedup.len(),
        });
    }

    Ok(AlignedSeriesPair {
        timestamps,
        x: x_prices,
        y: y_prices,
    })
}
