use crate::{
    error::BackendError,
    model::{Observation, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded per-symbol fan-out for backends that cannot batch.
pub mod fanout;

/// SQLite backed implementation of every reader.
pub mod sqlite;

/// Deadline wrapper applied to every backend call.
pub mod timeout;

/// Raw `(symbol, timestamp, price, open_interest)` row returned by a [`SeriesReader`].
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct SeriesRow {
    pub symbol: Symbol,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub open_interest: f64,
}

impl From<SeriesRow> for Observation {
    fn from(row: SeriesRow) -> Self {
        Observation::new(row.time, row.price, row.open_interest)
    }
}

/// Raw reference row returned by a [`ReferenceReader`].
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct ReferenceRow {
    pub symbol: Symbol,
    pub circulating_supply: Option<f64>,
    pub market_cap: Option<f64>,
}

/// Which observations a [`SeriesReader`] should return for each symbol.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    /// Every observation newer than `now - duration`.
    Recent(Duration),
    /// The `limit` most recent observations per symbol.
    ///
    /// With `sample_step > 1` only the newest row plus every `sample_step`-th row (by recency
    /// rank) within the limit is returned.
    Latest { limit: usize, sample_step: usize },
}

impl TimeWindow {
    /// Relative window of `hours`, or `None` if it does not fit in a [`Duration`] of seconds.
    pub fn recent_hours(hours: u64) -> Option<Self> {
        hours
            .checked_mul(3600)
            .map(|secs| Self::Recent(Duration::from_secs(secs)))
    }

    pub fn latest(limit: usize) -> Self {
        Self::Latest {
            limit,
            sample_step: 1,
        }
    }

    pub fn latest_sampled(limit: usize, sample_step: usize) -> Self {
        Self::Latest { limit, sample_step }
    }

    /// Per-symbol row cap, if this window is expressed as one.
    pub fn row_cap(&self) -> Option<usize> {
        match self {
            TimeWindow::Recent(_) => None,
            TimeWindow::Latest { limit, .. } => Some(*limit),
        }
    }

    /// Sampling stride, normalised so that 0 behaves like 1.
    pub fn sample_step(&self) -> usize {
        match self {
            TimeWindow::Recent(_) => 1,
            TimeWindow::Latest { sample_step, .. } => (*sample_step).max(1),
        }
    }

    /// Earliest timestamp included by a relative window, measured from `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeWindow::Recent(duration) => chrono::Duration::from_std(*duration)
                .ok()
                .and_then(|duration| now.checked_sub_signed(duration))
                .or(Some(DateTime::<Utc>::MIN_UTC)),
            TimeWindow::Latest { .. } => None,
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::latest_sampled(4000, 4)
    }
}

/// Time-series reader: many symbols, one round trip.
#[async_trait]
pub trait SeriesReader: Send + Sync {
    /// Read raw rows for `symbols`, restricted by `window`.
    ///
    /// Rows need not be ordered, but must be sortable by `(symbol, time)`.
    async fn read(
        &self,
        symbols: &[Symbol],
        window: TimeWindow,
    ) -> Result<Vec<SeriesRow>, BackendError>;
}

/// Time-series reader that can only serve one symbol per call.
///
/// Wrap with [`FanOutReader`](fanout::FanOutReader) to obtain a [`SeriesReader`].
#[async_trait]
pub trait SymbolSeriesReader: Send + Sync {
    async fn read_symbol(
        &self,
        symbol: &Symbol,
        window: TimeWindow,
    ) -> Result<Vec<SeriesRow>, BackendError>;
}

/// Lists every known symbol, most active first (eg/ by latest notional open interest).
#[async_trait]
pub trait SymbolLister: Send + Sync {
    async fn list_symbols_by_activity(&self) -> Result<Vec<Symbol>, BackendError>;
}

/// Reads all reference data in one call.
#[async_trait]
pub trait ReferenceReader: Send + Sync {
    async fn read_all(&self) -> Result<Vec<ReferenceRow>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_utils::time;

    #[test]
    fn test_time_window_accessors() {
        struct TestCase {
            input: TimeWindow,
            expected_cap: Option<usize>,
            expected_step: usize,
        }

        let tests = vec![
            TestCase {
                // TC0: plain row cap
                input: TimeWindow::latest(500),
                expected_cap: Some(500),
                expected_step: 1,
            },
            TestCase {
                // TC1: sampled row cap
                input: TimeWindow::latest_sampled(4000, 4),
                expected_cap: Some(4000),
                expected_step: 4,
            },
            TestCase {
                // TC2: zero step normalised
                input: TimeWindow::latest_sampled(10, 0),
                expected_cap: Some(10),
                expected_step: 1,
            },
            TestCase {
                // TC3: relative window has no cap
                input: TimeWindow::recent_hours(24).unwrap(),
                expected_cap: None,
                expected_step: 1,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.input.row_cap(), test.expected_cap, "TC{} cap failed", index);
            assert_eq!(
                test.input.sample_step(),
                test.expected_step,
                "TC{} step failed",
                index
            );
        }
    }

    #[test]
    fn test_time_window_cutoff() {
        let now = time(120);
        assert_eq!(TimeWindow::recent_hours(1).unwrap().cutoff(now), Some(time(60)));
        assert_eq!(TimeWindow::latest(10).cutoff(now), None);
    }

    #[test]
    fn test_recent_hours_overflow() {
        assert_eq!(
            TimeWindow::recent_hours(u64::MAX / 3600),
            Some(TimeWindow::Recent(Duration::from_secs(u64::MAX / 3600 * 3600)))
        );
        assert_eq!(TimeWindow::recent_hours(u64::MAX / 3600 + 1), None);
    }
}
