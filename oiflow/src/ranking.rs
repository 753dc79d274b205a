use crate::{
    error::DataWarning,
    metric::SymbolMetrics,
    model::{ReferenceMap, SeriesMap, Symbol},
};
use derive_more::Display;
use fnv::FnvHashSet;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Default number of entries kept per [`RankedView`].
pub const DEFAULT_TOP_N: usize = 10;

/// Metric a [`RankedView`] is sorted by.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ViewKey {
    #[display("intensity")]
    Intensity,
    #[display("growth")]
    Growth,
    #[display("price_change")]
    PriceChange,
    #[display("oi_change")]
    OiChange,
}

impl ViewKey {
    pub const ALL: [ViewKey; 4] = [
        ViewKey::Intensity,
        ViewKey::Growth,
        ViewKey::PriceChange,
        ViewKey::OiChange,
    ];

    pub fn value(&self, metrics: &SymbolMetrics) -> f64 {
        match self {
            ViewKey::Intensity => metrics.intensity,
            ViewKey::Growth => metrics.oi_growth_value,
            ViewKey::PriceChange => metrics.price_change_pct,
            ViewKey::OiChange => metrics.oi_change_pct,
        }
    }
}

impl std::str::FromStr for ViewKey {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ViewKey::ALL
            .into_iter()
            .find(|key| key.to_string().eq_ignore_ascii_case(input.trim()))
            .ok_or_else(|| format!("unknown view {input:?}"))
    }
}

/// How view keys are compared.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum RankOrder {
    /// Largest signed value first; outflows rank last.
    #[default]
    #[display("signed")]
    Signed,
    /// Largest absolute value first; strong outflows rank alongside strong inflows.
    #[display("magnitude")]
    Magnitude,
}

impl RankOrder {
    fn sort_value(&self, value: f64) -> f64 {
        match self {
            RankOrder::Signed => value,
            RankOrder::Magnitude => value.abs(),
        }
    }
}

impl std::str::FromStr for RankOrder {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "signed" => Ok(RankOrder::Signed),
            "magnitude" | "abs" => Ok(RankOrder::Magnitude),
            other => Err(format!("unknown rank order {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RankingConfig {
    pub views: Vec<ViewKey>,
    pub top_n: usize,
    pub order: RankOrder,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            views: vec![ViewKey::Intensity, ViewKey::Growth],
            top_n: DEFAULT_TOP_N,
            order: RankOrder::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    /// 1-based position within the view.
    pub rank: usize,
    pub metrics: Arc<SymbolMetrics>,
}

impl RankedEntry {
    pub fn symbol(&self) -> &Symbol {
        &self.metrics.symbol
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedView {
    pub key: ViewKey,
    pub entries: Vec<RankedEntry>,
}

impl RankedView {
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.entries.iter().map(RankedEntry::symbol)
    }
}

/// Output of [`RankingEngine::rank`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    pub views: Vec<RankedView>,
    /// Universe symbols that appear in no view, in universe order.
    pub remainder: Vec<Symbol>,
    /// Symbols without enough observations to rank, with their point count.
    pub excluded: Vec<(Symbol, usize)>,
    /// Metrics for every ranked symbol, in universe order.
    pub metrics: IndexMap<Symbol, Arc<SymbolMetrics>>,
    /// Ranked symbols lacking a usable reference record.
    pub reference_missing: usize,
}

impl Ranking {
    pub fn view(&self, key: ViewKey) -> Option<&RankedView> {
        self.views.iter().find(|view| view.key == key)
    }

    pub fn metrics(&self, symbol: &str) -> Option<&Arc<SymbolMetrics>> {
        self.metrics.get(symbol)
    }

    /// Determine if nothing could be ranked.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Warning describing ranked symbols whose intensity fell back to the proxy tier.
    pub fn reference_warning(&self) -> Option<DataWarning> {
        (self.reference_missing > 0).then(|| DataWarning::StalePartialReference {
            missing: self.reference_missing,
            ranked: self.metrics.len(),
        })
    }

    pub fn exclusion_warnings(&self) -> impl Iterator<Item = DataWarning> + '_ {
        self.excluded
            .iter()
            .map(|(symbol, points)| DataWarning::InsufficientSeries {
                symbol: symbol.clone(),
                points: *points,
            })
    }
}

/// Computes [`SymbolMetrics`] for a universe and sorts them into configured views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingEngine {
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn rank(&self, symbols: &[Symbol], series: &SeriesMap, reference: &ReferenceMap) -> Ranking {
        let universe = symbols.iter().unique().collect::<Vec<_>>();

        let mut metrics = IndexMap::with_capacity(universe.len());
        let mut excluded = Vec::new();
        let mut reference_missing = 0;

        for symbol in &universe {
            let record = reference.get(*symbol);
            let computed = series
                .get(*symbol)
                .and_then(|series| SymbolMetrics::compute(series, record));

            match computed {
                Some(computed) => {
                    if !record.is_some_and(|record| record.is_usable()) {
                        reference_missing += 1;
                    }
                    metrics.insert((*symbol).clone(), Arc::new(computed));
                }
                None => {
                    let points = series.get(*symbol).map_or(0, |series| series.len());
                    debug!(%symbol, points, "excluding symbol with insufficient series");
                    excluded.push(((*symbol).clone(), points));
                }
            }
        }

        let views = self
            .config
            .views
            .iter()
            .unique()
            .map(|key| self.view(*key, &metrics))
            .collect::<Vec<_>>();

        let members = views
            .iter()
            .flat_map(RankedView::symbols)
            .collect::<FnvHashSet<_>>();

        let remainder = universe
            .iter()
            .filter(|symbol| !members.contains(**symbol))
            .map(|symbol| (*symbol).clone())
            .collect();

        Ranking {
            views,
            remainder,
            excluded,
            metrics,
            reference_missing,
        }
    }

    fn view(&self, key: ViewKey, metrics: &IndexMap<Symbol, Arc<SymbolMetrics>>) -> RankedView {
        let order = self.config.order;
        let mut sorted = metrics.values().collect::<Vec<_>>();

        // Stable, so ties keep universe order
        sorted.sort_by(|a, b| {
            order
                .sort_value(key.value(b))
                .total_cmp(&order.sort_value(key.value(a)))
        });

        RankedView {
            key,
            entries: sorted
                .into_iter()
                .take(self.config.top_n)
                .enumerate()
                .map(|(index, metrics)| RankedEntry {
                    rank: index + 1,
                    metrics: Arc::clone(metrics),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObservationSeries, ReferenceRecord, test_utils::series};

    fn universe(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|name| Symbol::new(name)).collect()
    }

    fn series_map(entries: Vec<ObservationSeries>) -> SeriesMap {
        entries
            .into_iter()
            .map(|series| (series.symbol().clone(), Arc::new(series)))
            .collect()
    }

    fn view_symbols(ranking: &Ranking, key: ViewKey) -> Vec<&str> {
        ranking
            .view(key)
            .unwrap()
            .symbols()
            .map(Symbol::as_str)
            .collect()
    }

    fn market() -> (Vec<Symbol>, SeriesMap, ReferenceMap) {
        let symbols = universe(&["BTC", "ETH", "SOL", "DOGE", "NEW"]);
        let series = series_map(vec![
            // growth 10 * 100 = 1000, intensity 1000 / 1e6
            series("BTC", &[(100.0, 100.0), (100.0, 110.0)]),
            // growth 50 * 10 = 500, intensity 500 / 1000
            series("ETH", &[(10.0, 100.0), (10.0, 150.0)]),
            // falling price & oi, growth 0
            series("SOL", &[(5.0, 200.0), (4.0, 150.0)]),
            // proxy tier: 20 / 100 * 0.1 = 0.02, growth 20
            series("DOGE", &[(1.0, 100.0), (1.0, 120.0)]),
            series("NEW", &[(1.0, 1.0)]),
        ]);
        let reference = [
            ("BTC", ReferenceRecord::new(None, Some(1_000_000.0))),
            ("ETH", ReferenceRecord::new(None, Some(1_000.0))),
            ("SOL", ReferenceRecord::new(Some(10_000.0), None)),
        ]
        .into_iter()
        .map(|(symbol, record)| (Symbol::new(symbol), record))
        .collect();

        (symbols, series, reference)
    }

    #[test]
    fn test_rank_views_sorted_descending() {
        let (symbols, series, reference) = market();
        let ranking = RankingEngine::default().rank(&symbols, &series, &reference);

        assert_eq!(
            view_symbols(&ranking, ViewKey::Intensity),
            vec!["ETH", "DOGE", "BTC", "SOL"]
        );
        assert_eq!(
            view_symbols(&ranking, ViewKey::Growth),
            vec!["BTC", "ETH", "DOGE", "SOL"]
        );

        for view in &ranking.views {
            let values = view
                .entries
                .iter()
                .map(|entry| view.key.value(&entry.metrics))
                .collect::<Vec<_>>();
            assert!(values.windows(2).all(|pair| pair[0] >= pair[1]));
            assert_eq!(
                view.entries.iter().map(|entry| entry.rank).collect::<Vec<_>>(),
                (1..=view.entries.len()).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn test_rank_excludes_short_series_and_counts_missing_reference() {
        let (symbols, series, reference) = market();
        let ranking = RankingEngine::default().rank(&symbols, &series, &reference);

        assert_eq!(ranking.excluded, vec![(Symbol::new("NEW"), 1)]);
        assert!(ranking.metrics("NEW").is_none());
        assert_eq!(ranking.reference_missing, 1);
        assert_eq!(
            ranking.reference_warning(),
            Some(DataWarning::StalePartialReference {
                missing: 1,
                ranked: 4
            })
        );
        assert_eq!(ranking.exclusion_warnings().count(), 1);
    }

    #[test]
    fn test_rank_remainder_deduplicated_once() {
        let (mut symbols, series, reference) = market();
        symbols.push(Symbol::new("BTC"));
        symbols.push(Symbol::new("MISSING"));

        let engine = RankingEngine::new(RankingConfig {
            top_n: 2,
            ..Default::default()
        });
        let ranking = engine.rank(&symbols, &series, &reference);

        // ETH is in both views, BTC is in one, yet neither appears in the remainder
        assert_eq!(view_symbols(&ranking, ViewKey::Intensity), vec!["ETH", "DOGE"]);
        assert_eq!(view_symbols(&ranking, ViewKey::Growth), vec!["BTC", "ETH"]);
        assert_eq!(
            ranking.remainder,
            universe(&["SOL", "NEW", "MISSING"])
        );
        assert_eq!(
            ranking.excluded,
            vec![(Symbol::new("NEW"), 1), (Symbol::new("MISSING"), 0)]
        );
    }

    #[test]
    fn test_rank_ties_keep_universe_order() {
        let symbols = universe(&["C", "A", "B"]);
        let series = series_map(vec![
            series("A", &[(1.0, 10.0), (1.0, 10.0)]),
            series("B", &[(1.0, 10.0), (1.0, 10.0)]),
            series("C", &[(1.0, 10.0), (1.0, 10.0)]),
        ]);

        let ranking = RankingEngine::default().rank(&symbols, &series, &ReferenceMap::default());

        assert_eq!(view_symbols(&ranking, ViewKey::Intensity), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_rank_order_magnitude() {
        let symbols = universe(&["UP", "DOWN"]);
        let series = series_map(vec![
            series("UP", &[(10.0, 1.0), (11.0, 1.0)]),
            series("DOWN", &[(10.0, 1.0), (5.0, 1.0)]),
        ]);

        struct TestCase {
            order: RankOrder,
            expected: Vec<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: outflow ranks last
                order: RankOrder::Signed,
                expected: vec!["UP", "DOWN"],
            },
            TestCase {
                // TC1: larger move ranks first regardless of direction
                order: RankOrder::Magnitude,
                expected: vec!["DOWN", "UP"],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let engine = RankingEngine::new(RankingConfig {
                views: vec![ViewKey::PriceChange],
                order: test.order,
                ..Default::default()
            });
            let ranking = engine.rank(&symbols, &series, &ReferenceMap::default());
            assert_eq!(
                view_symbols(&ranking, ViewKey::PriceChange),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_rank_empty_universe() {
        let ranking =
            RankingEngine::default().rank(&[], &SeriesMap::default(), &ReferenceMap::default());

        assert!(ranking.is_empty());
        assert!(ranking.views.iter().all(|view| view.entries.is_empty()));
        assert!(ranking.remainder.is_empty());
        assert_eq!(ranking.reference_warning(), None);
    }

    #[test]
    fn test_view_key_and_order_parse() {
        assert_eq!("Growth".parse::<ViewKey>(), Ok(ViewKey::Growth));
        assert_eq!(" oi_change ".parse::<ViewKey>(), Ok(ViewKey::OiChange));
        assert!("volume".parse::<ViewKey>().is_err());
        assert_eq!("MAGNITUDE".parse::<RankOrder>(), Ok(RankOrder::Magnitude));
        assert!("sideways".parse::<RankOrder>().is_err());
    }
}
