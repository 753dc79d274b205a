use crate::{
    cache::{CacheStats, TtlCache},
    chart::ChartSeries,
    config::MonitorConfig,
    error::DataWarning,
    model::{ReferenceMap, SeriesMap, Symbol},
    ranking::{Ranking, RankingConfig, RankingEngine},
    source::{ReferenceReader, SeriesReader, SymbolLister, TimeWindow},
    store::{Fetched, ReferenceStore, SeriesStore, SymbolUniverse},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{future::Future, hash::Hash, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

type SnapshotKey = (usize, TimeWindow, RankingConfig);

/// Cache of adapter fetches; degraded fetches travel the error side and are never stored.
pub type FetchCache<Key, Value> = TtlCache<Key, Fetched<Value>, Fetched<Value>>;

/// One run of the ranking pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
    /// Symbols considered, most active first.
    pub universe: Vec<Symbol>,
    pub series: SeriesMap,
    pub ranking: Ranking,
    pub warnings: Vec<DataWarning>,
}

impl Snapshot {
    fn empty(window: TimeWindow, warnings: Vec<DataWarning>) -> Self {
        Self {
            generated_at: Utc::now(),
            window,
            universe: Vec::new(),
            series: SeriesMap::default(),
            ranking: Ranking::default(),
            warnings,
        }
    }

    /// Determine if any warning left the ranking empty or partial.
    pub fn is_degraded(&self) -> bool {
        self.warnings.iter().any(DataWarning::degrades_ranking)
    }

    /// Determine if producing the snapshot hit a failed backend call.
    pub fn has_backend_failure(&self) -> bool {
        self.warnings.iter().any(DataWarning::is_backend_failure)
    }
}

/// Caches backing a [`FlowMonitor`], shareable between monitors over the same backends.
#[derive(Debug, Default)]
pub struct MonitorCaches {
    pub universe: FetchCache<usize, Vec<Symbol>>,
    pub reference: FetchCache<(), Arc<ReferenceMap>>,
    pub series: FetchCache<(Vec<Symbol>, TimeWindow), SeriesMap>,
    pub snapshot: TtlCache<SnapshotKey, Arc<Snapshot>, Arc<Snapshot>>,
}

/// Counters of every cache in a [`MonitorCaches`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize)]
pub struct MonitorCacheStats {
    pub universe: CacheStats,
    pub reference: CacheStats,
    pub series: CacheStats,
    pub snapshot: CacheStats,
}

impl MonitorCaches {
    pub fn stats(&self) -> MonitorCacheStats {
        MonitorCacheStats {
            universe: self.universe.stats(),
            reference: self.reference.stats(),
            series: self.series.stats(),
            snapshot: self.snapshot.stats(),
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.universe.purge_expired()
            + self.reference.purge_expired()
            + self.series.purge_expired()
            + self.snapshot.purge_expired()
    }

    pub fn clear(&self) {
        self.universe.clear();
        self.reference.clear();
        self.series.clear();
        self.snapshot.clear();
    }
}

/// Wires the symbol universe, reference data and series store into cached ranking snapshots.
#[derive(Debug, Clone)]
pub struct FlowMonitor {
    universe: SymbolUniverse,
    reference: ReferenceStore,
    series: SeriesStore,
    engine: RankingEngine,
    config: MonitorConfig,
    caches: Arc<MonitorCaches>,
}

impl FlowMonitor {
    pub fn new(
        lister: Arc<dyn SymbolLister>,
        series: Arc<dyn SeriesReader>,
        reference: Arc<dyn ReferenceReader>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            universe: SymbolUniverse::new(lister).with_timeout(config.backend_timeout),
            reference: ReferenceStore::new(reference).with_timeout(config.backend_timeout),
            series: SeriesStore::new(series).with_timeout(config.backend_timeout),
            engine: RankingEngine::new(config.ranking.clone()),
            config,
            caches: Arc::new(MonitorCaches::default()),
        }
    }

    /// Construct a [`FlowMonitor`] over a single backend serving every reader.
    pub fn from_source<Source>(source: Arc<Source>, config: MonitorConfig) -> Self
    where
        Source: SymbolLister + SeriesReader + ReferenceReader + 'static,
    {
        Self::new(source.clone(), source.clone(), source, config)
    }

    pub fn with_caches(mut self, caches: Arc<MonitorCaches>) -> Self {
        self.caches = caches;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<MonitorCaches> {
        &self.caches
    }

    /// Produce (or serve a cached) ranking snapshot.
    ///
    /// Never fails: backend failures surface as [`Snapshot::warnings`]. Snapshots produced
    /// despite a failed backend call are returned to every caller that was waiting on them but
    /// not cached, so the next call retries.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        let key = (
            self.config.universe_size,
            self.config.window,
            self.config.ranking.clone(),
        );

        let result = self
            .caches
            .snapshot
            .get_or_compute(key, self.config.ttls.snapshot, || async move {
                let snapshot = Arc::new(self.produce().await);
                if snapshot.has_backend_failure() {
                    Err(snapshot)
                } else {
                    Ok(snapshot)
                }
            })
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(degraded) => {
                warn!(
                    warnings = degraded.warnings.len(),
                    "snapshot produced with backend failures, not caching"
                );
                degraded
            }
        }
    }

    /// Downsampled chart series for `symbol`, with a summary if it was ranked.
    pub fn chart(&self, snapshot: &Snapshot, symbol: &str) -> Option<ChartSeries> {
        let series = snapshot.series.get(symbol)?;
        let metrics = snapshot.ranking.metrics(symbol).map(Arc::as_ref);
        Some(ChartSeries::build(series, metrics, &self.config.downsampler))
    }

    async fn produce(&self) -> Snapshot {
        let window = self.config.window;
        let mut warnings = Vec::new();

        let size = self.config.universe_size;
        let (universe, warning) = cached(
            &self.caches.universe,
            size,
            self.config.ttls.universe,
            || self.universe.top(size),
        )
        .await
        .into_parts();
        warnings.extend(warning);

        if universe.is_empty() {
            warn!(?warnings, "empty symbol universe, nothing to rank");
            return Snapshot::empty(window, warnings);
        }

        let (reference, reference_warning) = cached(
            &self.caches.reference,
            (),
            self.config.ttls.reference,
            || async move { self.reference.fetch_all().await.map(Arc::new) },
        )
        .await
        .into_parts();
        let reference_degraded = reference_warning.is_some();
        warnings.extend(reference_warning);

        let (series, warning) = cached(
            &self.caches.series,
            (universe.clone(), window),
            self.config.ttls.series,
            || self.series.fetch(&universe, window),
        )
        .await
        .into_parts();
        warnings.extend(warning);

        let ranking = self.engine.rank(&universe, &series, &reference);
        if !reference_degraded {
            warnings.extend(ranking.reference_warning());
        }
        for warning in ranking.exclusion_warnings() {
            debug!(%warning, "symbol excluded from ranking");
        }

        info!(
            universe = universe.len(),
            series = series.len(),
            ranked = ranking.metrics.len(),
            excluded = ranking.excluded.len(),
            warnings = warnings.len(),
            "produced ranking snapshot"
        );

        Snapshot {
            generated_at: Utc::now(),
            window,
            universe,
            series,
            ranking,
            warnings,
        }
    }
}

/// Serve `fetch` through `cache`, caching only results that were not degraded by a backend
/// failure.
async fn cached<Key, Value, Fetch, Fut>(
    cache: &FetchCache<Key, Value>,
    key: Key,
    ttl: Duration,
    fetch: Fetch,
) -> Fetched<Value>
where
    Key: Eq + Hash + Clone,
    Value: Clone,
    Fetch: FnOnce() -> Fut,
    Fut: Future<Output = Fetched<Value>>,
{
    let result = cache
        .get_or_compute(key, ttl, || async move {
            let fetched = fetch().await;
            if fetched.is_backend_failure() {
                Err(fetched)
            } else {
                Ok(fetched)
            }
        })
        .await;

    match result {
        Ok(fetched) | Err(fetched) => fetched,
    }
}
