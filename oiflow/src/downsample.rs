use crate::model::ObservationSeries;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default number of points a chart series is reduced to.
pub const DEFAULT_TARGET_POINTS: usize = 400;

/// Default tolerance before reduction kicks in; a series up to 1.5x the target is left alone.
pub const DEFAULT_SLACK: f64 = 1.5;

/// Reduce `series` to at most `target_points` evenly strided points plus its last point.
///
/// Equivalent to [`Downsampler::reduce`] with a slack of 1.0.
pub fn reduce(series: &Arc<ObservationSeries>, target_points: usize) -> Arc<ObservationSeries> {
    Downsampler::new(target_points, 1.0).reduce(series)
}

/// Indices kept when reducing a series of `len` points to `target_points`.
///
/// Starts at 0, strides by `len / target_points`, takes at most `target_points` indices and
/// always ends with `len - 1`.
pub fn stride_indices(len: usize, target_points: usize) -> Vec<usize> {
    let target = target_points.max(1);
    if len == 0 {
        return Vec::new();
    }
    if len <= target {
        return (0..len).collect();
    }

    let step = len / target;
    let mut indices = (0..len).step_by(step).take(target).collect::<Vec<_>>();
    if indices.last() != Some(&(len - 1)) {
        indices.push(len - 1);
    }
    indices
}

/// Bounded-size series reduction for charting.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct Downsampler {
    pub target_points: usize,
    pub slack: f64,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_POINTS, DEFAULT_SLACK)
    }
}

impl Downsampler {
    /// Construct a [`Downsampler`]. A `target_points` of 0 behaves like 1, and `slack` below 1.0
    /// (or NaN) behaves like 1.0.
    pub fn new(target_points: usize, slack: f64) -> Self {
        Self {
            target_points: target_points.max(1),
            slack: if slack >= 1.0 { slack } else { 1.0 },
        }
    }

    /// Largest series length returned without reduction.
    pub fn threshold(&self) -> usize {
        let threshold = self.target_points as f64 * self.slack;
        if threshold >= usize::MAX as f64 {
            usize::MAX
        } else {
            threshold.floor() as usize
        }
    }

    /// Reduce `series`, returning the same [`Arc`] when it is already within the threshold.
    pub fn reduce(&self, series: &Arc<ObservationSeries>) -> Arc<ObservationSeries> {
        if series.len() <= self.threshold() {
            return Arc::clone(series);
        }

        let points = series.points();
        let reduced = stride_indices(points.len(), self.target_points)
            .into_iter()
            .map(|index| points[index])
            .collect();

        Arc::new(ObservationSeries::from_ordered(
            series.symbol().clone(),
            reduced,
        ))
    }
}
