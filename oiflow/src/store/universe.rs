use super::Fetched;
use crate::{
    error::{BackendError, DataOrigin, DataWarning},
    model::Symbol,
    source::{
        SymbolLister,
        timeout::{DEFAULT_BACKEND_TIMEOUT, with_timeout},
    },
};
use itertools::Itertools;
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// Selects the working universe: the most active symbols, most active first.
#[derive(Clone)]
pub struct SymbolUniverse {
    lister: Arc<dyn SymbolLister>,
    timeout: Duration,
}

impl std::fmt::Debug for SymbolUniverse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolUniverse")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SymbolUniverse {
    pub fn new(lister: Arc<dyn SymbolLister>) -> Self {
        Self {
            lister,
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Top `size` symbols by activity, degrading to an empty universe on backend failure.
    pub async fn top(&self, size: usize) -> Fetched<Vec<Symbol>> {
        match self.try_top(size).await {
            Ok(symbols) if symbols.is_empty() => Fetched::degraded(
                symbols,
                DataWarning::EmptyResult {
                    origin: DataOrigin::Universe,
                },
            ),
            Ok(symbols) => Fetched::complete(symbols),
            Err(error) => {
                warn!(%error, "symbol listing failed");
                Fetched::degraded(
                    Vec::new(),
                    DataWarning::unavailable(DataOrigin::Universe, &error),
                )
            }
        }
    }

    /// Top `size` distinct symbols by activity, surfacing backend failures.
    pub async fn try_top(&self, size: usize) -> Result<Vec<Symbol>, BackendError> {
        let listed = with_timeout(self.timeout, self.lister.list_symbols_by_activity()).await?;
        Ok(listed.into_iter().unique().take(size).collect())
    }
}
