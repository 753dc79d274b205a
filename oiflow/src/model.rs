use chrono::{DateTime, Utc};
use derive_more::Constructor;
use fnv::FnvHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;

/// Tradable symbol identifier (eg/ "BTC", "kPEPE").
pub type Symbol = SmolStr;

/// Per-symbol series in original fetch order.
pub type SeriesMap = IndexMap<Symbol, Arc<ObservationSeries>>;

/// Per-symbol reference data.
pub type ReferenceMap = FnvHashMap<Symbol, ReferenceRecord>;

/// Single price & open interest reading for a symbol.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Deserialize, Serialize, Constructor)]
pub struct Observation {
    pub time: DateTime<Utc>,
    /// Mark price in quote currency.
    pub price: f64,
    /// Outstanding open interest in base units (tokens / contracts).
    pub open_interest: f64,
}

/// Time-ascending [`Observation`]s for one symbol, without duplicate timestamps.
///
/// Immutable once built; share it behind an [`Arc`].
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct ObservationSeries {
    symbol: Symbol,
    points: Vec<Observation>,
}

impl ObservationSeries {
    /// Build a series from observations in any order.
    ///
    /// Observations sharing a timestamp collapse into the one supplied last.
    pub fn new<Iter>(symbol: Symbol, observations: Iter) -> Self
    where
        Iter: IntoIterator<Item = Observation>,
    {
        let mut observations = observations.into_iter().collect::<Vec<_>>();
        observations.sort_by_key(|observation| observation.time);

        let mut points: Vec<Observation> = Vec::with_capacity(observations.len());
        for observation in observations {
            match points.last_mut() {
                Some(last) if last.time == observation.time => *last = observation,
                _ => points.push(observation),
            }
        }

        Self { symbol, points }
    }

    /// Build from points already known to be strictly time-ascending, eg/ a subset of an
    /// existing series.
    pub(crate) fn from_ordered(symbol: Symbol, points: Vec<Observation>) -> Self {
        debug_assert!(points.windows(2).all(|pair| pair[0].time < pair[1].time));
        Self { symbol, points }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&Observation> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.points.last()
    }

    /// Lowest open interest reading in the series.
    pub fn min_open_interest(&self) -> Option<f64> {
        self.points
            .iter()
            .map(|observation| observation.open_interest)
            .reduce(f64::min)
    }

    /// Keep only the `limit` most recent observations.
    pub fn most_recent(self, limit: usize) -> Self {
        if self.points.len() <= limit {
            return self;
        }

        let Self { symbol, mut points } = self;
        let excess = points.len() - limit;
        points.drain(..excess);
        Self { symbol, points }
    }
}

/// Slow-moving reference data used to normalise open interest growth.
///
/// Present values are always finite and non-negative; `market_cap` takes priority over
/// `circulating_supply` when both are present.
#[derive(Clone, Copy, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct ReferenceRecord {
    pub circulating_supply: Option<f64>,
    pub market_cap: Option<f64>,
}

impl ReferenceRecord {
    /// Construct a [`ReferenceRecord`], discarding negative or non-finite values.
    pub fn new(circulating_supply: Option<f64>, market_cap: Option<f64>) -> Self {
        Self {
            circulating_supply: circulating_supply.filter(|value| is_sane(*value)),
            market_cap: market_cap.filter(|value| is_sane(*value)),
        }
    }

    /// Market capitalisation, if known and usable as a denominator.
    pub fn usable_market_cap(&self) -> Option<f64> {
        self.market_cap.filter(|value| *value > 0.0)
    }

    /// Circulating supply, if known and usable as a denominator.
    pub fn usable_circulating_supply(&self) -> Option<f64> {
        self.circulating_supply.filter(|value| *value > 0.0)
    }

    /// Determine if the record can drive a reference-based intensity tier.
    pub fn is_usable(&self) -> bool {
        self.usable_market_cap().is_some() || self.usable_circulating_supply().is_some()
    }
}

fn is_sane(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}
