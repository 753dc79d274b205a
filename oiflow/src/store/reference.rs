use super::Fetched;
use crate::{
    error::{BackendError, DataOrigin, DataWarning},
    model::{ReferenceMap, ReferenceRecord},
    source::{
        ReferenceReader,
        timeout::{DEFAULT_BACKEND_TIMEOUT, with_timeout},
    },
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Loads per-symbol circulating supply & market capitalisation.
///
/// Failure here never fails a ranking: metrics fall back through their intensity tiers.
#[derive(Clone)]
pub struct ReferenceStore {
    reader: Arc<dyn ReferenceReader>,
    timeout: Duration,
}

impl std::fmt::Debug for ReferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ReferenceStore {
    pub fn new(reader: Arc<dyn ReferenceReader>) -> Self {
        Self {
            reader,
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load every reference record, degrading to an empty mapping on backend failure.
    pub async fn fetch_all(&self) -> Fetched<ReferenceMap> {
        match self.try_fetch_all().await {
            Ok(records) if records.is_empty() => Fetched::degraded(
                records,
                DataWarning::EmptyResult {
                    origin: DataOrigin::Reference,
                },
            ),
            Ok(records) => Fetched::complete(records),
            Err(error) => {
                warn!(%error, "reference data fetch failed, intensity falls back to proxy tiers");
                Fetched::degraded(
                    ReferenceMap::default(),
                    DataWarning::unavailable(DataOrigin::Reference, &error),
                )
            }
        }
    }

    /// Load every reference record, surfacing backend failures.
    pub async fn try_fetch_all(&self) -> Result<ReferenceMap, BackendError> {
        let rows = with_timeout(self.timeout, self.reader.read_all()).await?;
        debug!(rows = rows.len(), "fetched reference rows");

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.symbol,
                    ReferenceRecord::new(row.circulating_supply, row.market_cap),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::Symbol, source::ReferenceRow};
    use async_trait::async_trait;

    struct FixedReader(Result<Vec<ReferenceRow>, BackendError>);

    #[async_trait]
    impl ReferenceReader for FixedReader {
        async fn read_all(&self) -> Result<Vec<ReferenceRow>, BackendError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_fetch_all_sanitises_records() {
        let store = ReferenceStore::new(Arc::new(FixedReader(Ok(vec![
            ReferenceRow {
                symbol: Symbol::new("BTC"),
                circulating_supply: Some(19_000_000.0),
                market_cap: Some(-5.0),
            },
            ReferenceRow {
                symbol: Symbol::new("HYPE"),
                circulating_supply: None,
                market_cap: None,
            },
        ]))));

        let fetched = store.fetch_all().await;

        assert!(!fetched.is_degraded());
        assert_eq!(
            fetched.value["BTC"],
            ReferenceRecord {
                circulating_supply: Some(19_000_000.0),
                market_cap: None,
            }
        );
        assert_eq!(fetched.value["HYPE"], ReferenceRecord::default());
    }

    #[tokio::test]
    async fn test_fetch_all_failure_is_non_fatal() {
        let store = ReferenceStore::new(Arc::new(FixedReader(Err(BackendError::Query(
            "no such table: circulating_supply".to_string(),
        )))));

        let fetched = store.fetch_all().await;

        assert!(fetched.value.is_empty());
        assert!(matches!(
            fetched.warning,
            Some(DataWarning::BackendUnavailable {
                origin: DataOrigin::Reference,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_all_empty_table() {
        let store = ReferenceStore::new(Arc::new(FixedReader(Ok(vec![]))));

        let fetched = store.fetch_all().await;

        assert_eq!(
            fetched.warning,
            Some(DataWarning::EmptyResult {
                origin: DataOrigin::Reference
            })
        );
    }
}
