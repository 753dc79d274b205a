use super::{SeriesReader, SeriesRow, SymbolSeriesReader, TimeWindow, timeout::with_timeout};
use crate::{error::BackendError, model::Symbol};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Default bound on concurrent per-symbol backend calls.
pub const DEFAULT_FAN_OUT_CONCURRENCY: usize = 20;

/// [`SeriesReader`] that issues one [`SymbolSeriesReader`] call per symbol with bounded
/// concurrency, joining every outstanding call before returning.
///
/// Symbols whose call fails or times out are omitted from the result (treated as empty). The
/// call as a whole only fails when every symbol failed.
#[derive(Debug)]
pub struct FanOutReader<Reader> {
    inner: Arc<Reader>,
    max_concurrency: usize,
    call_timeout: Duration,
}

impl<Reader> FanOutReader<Reader> {
    pub fn new(inner: Arc<Reader>) -> Self {
        Self {
            inner,
            max_concurrency: DEFAULT_FAN_OUT_CONCURRENCY,
            call_timeout: super::timeout::DEFAULT_BACKEND_TIMEOUT,
        }
    }

    /// Set the maximum number of in-flight per-symbol calls (at least 1).
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Set the deadline applied to each per-symbol call.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

#[async_trait]
impl<Reader> SeriesReader for FanOutReader<Reader>
where
    Reader: SymbolSeriesReader + 'static,
{
    async fn read(
        &self,
        symbols: &[Symbol],
        window: TimeWindow,
    ) -> Result<Vec<SeriesRow>, BackendError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let call_timeout = self.call_timeout;
        let results = stream::iter(symbols.iter().cloned())
            .map(|symbol| {
                let inner = Arc::clone(&self.inner);
                async move {
                    let result =
                        with_timeout(call_timeout, inner.read_symbol(&symbol, window)).await;
                    (symbol, result)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut failures = 0;
        let mut rows = Vec::new();
        for (symbol, result) in results {
            match result {
                Ok(symbol_rows) => rows.extend(symbol_rows),
                Err(error) => {
                    failures += 1;
                    debug!(%symbol, %error, "per-symbol read failed, omitting symbol");
                }
            }
        }

        if failures == symbols.len() {
            warn!(symbols = symbols.len(), "every per-symbol read failed");
            return Err(BackendError::AllSymbolsFailed(failures));
        }

        if failures > 0 {
            warn!(
                failures,
                symbols = symbols.len(),
                "per-symbol fan-out completed with omitted symbols"
            );
        }

        Ok(rows)
    }
}
