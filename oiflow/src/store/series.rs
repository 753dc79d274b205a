use super::Fetched;
use crate::{
    error::{BackendError, DataOrigin, DataWarning},
    model::{ObservationSeries, SeriesMap, Symbol},
    source::{
        SeriesReader, SeriesRow, TimeWindow,
        timeout::{DEFAULT_BACKEND_TIMEOUT, with_timeout},
    },
};
use itertools::Itertools;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Fetches raw rows for many symbols in one round trip and partitions them into one
/// time-ascending [`ObservationSeries`] per symbol.
#[derive(Clone)]
pub struct SeriesStore {
    reader: Arc<dyn SeriesReader>,
    timeout: Duration,
}

impl std::fmt::Debug for SeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SeriesStore {
    pub fn new(reader: Arc<dyn SeriesReader>) -> Self {
        Self {
            reader,
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch series for `symbols`, degrading to an empty mapping on backend failure.
    pub async fn fetch(&self, symbols: &[Symbol], window: TimeWindow) -> Fetched<SeriesMap> {
        match self.try_fetch(symbols, window).await {
            Ok(series) if series.is_empty() && !symbols.is_empty() => Fetched::degraded(
                series,
                DataWarning::EmptyResult {
                    origin: DataOrigin::Series,
                },
            ),
            Ok(series) => Fetched::complete(series),
            Err(error) => {
                warn!(%error, symbols = symbols.len(), "series fetch failed");
                Fetched::degraded(
                    SeriesMap::default(),
                    DataWarning::unavailable(DataOrigin::Series, &error),
                )
            }
        }
    }

    /// Fetch series for `symbols`, surfacing backend failures.
    ///
    /// An empty `symbols` slice returns an empty mapping without calling the backend.
    pub async fn try_fetch(
        &self,
        symbols: &[Symbol],
        window: TimeWindow,
    ) -> Result<SeriesMap, BackendError> {
        let symbols = symbols.iter().unique().cloned().collect::<Vec<_>>();
        if symbols.is_empty() {
            return Ok(SeriesMap::default());
        }

        let rows = with_timeout(self.timeout, self.reader.read(&symbols, window)).await?;
        debug!(
            symbols = symbols.len(),
            rows = rows.len(),
            "fetched series rows"
        );

        Ok(partition(&symbols, rows, window))
    }
}

/// Group `rows` into one series per requested symbol, in `symbols` order.
///
/// Rows for symbols that were not requested are discarded; requested symbols without rows are
/// absent from the result. Row caps are re-applied after sorting so a reader that over-returns
/// cannot widen the window.
pub fn partition(symbols: &[Symbol], rows: Vec<SeriesRow>, window: TimeWindow) -> SeriesMap {
    let mut grouped = rows
        .into_iter()
        .into_group_map_by(|row| row.symbol.clone());

    symbols
        .iter()
        .filter_map(|symbol| {
            let rows = grouped.remove(symbol)?;
            let series = ObservationSeries::new(symbol.clone(), rows.into_iter().map(Into::into));
            let series = match window.row_cap() {
                Some(cap) => series.most_recent(cap),
                None => series,
            };
            Some((symbol.clone(), Arc::new(series)))
        })
        .collect()
}
