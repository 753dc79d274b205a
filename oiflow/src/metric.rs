//! Per-symbol money-flow metrics.
//!
//! Open interest growth is measured from the lowest reading in the window to the latest one, so
//! it is never negative. Intensity normalises that growth by the best reference data available:
//!
//! | Tier | Condition              | Intensity                                   |
//! |------|------------------------|---------------------------------------------|
//! | A    | `market_cap > 0`       | `growth_value / market_cap`                 |
//! | B    | `circulating_supply > 0` | `growth_tokens / circulating_supply`      |
//! | C    | `baseline_oi > 0`      | `(growth_tokens / baseline_oi) * 0.1`       |
//! | -    | otherwise              | `0`                                         |

use crate::model::{ObservationSeries, ReferenceRecord, Symbol};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Weight applied to relative open interest growth when no reference data is usable.
pub const PROXY_INTENSITY_WEIGHT: f64 = 0.1;

/// Percentage changes within `[-SIGNAL_EPSILON, SIGNAL_EPSILON]` are treated as flat.
pub const SIGNAL_EPSILON: f64 = 1e-9;

/// Reference tier that produced a [`SymbolMetrics::intensity`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum IntensityBasis {
    #[display("market cap")]
    MarketCap,
    #[display("circulating supply")]
    CirculatingSupply,
    #[display("oi proxy")]
    OpenInterestProxy,
    #[display("none")]
    Unavailable,
}

/// Directional quadrant derived from the signs of price & open interest change.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Price up, open interest up: new longs opening.
    #[display("long buildup")]
    LongBuildup,
    /// Price up, open interest down: shorts closing.
    #[display("short covering")]
    ShortCovering,
    /// Price down, open interest up: new shorts opening.
    #[display("short buildup")]
    ShortBuildup,
    /// Price down, open interest down: longs closing.
    #[display("long liquidation")]
    LongLiquidation,
    #[display("neutral")]
    Neutral,
}

impl Signal {
    pub fn classify(price_change_pct: f64, oi_change_pct: f64) -> Self {
        use std::cmp::Ordering::*;

        match (direction(price_change_pct), direction(oi_change_pct)) {
            (Greater, Greater) => Signal::LongBuildup,
            (Greater, Less) => Signal::ShortCovering,
            (Less, Greater) => Signal::ShortBuildup,
            (Less, Less) => Signal::LongLiquidation,
            _ => Signal::Neutral,
        }
    }
}

fn direction(change: f64) -> std::cmp::Ordering {
    if change > SIGNAL_EPSILON {
        std::cmp::Ordering::Greater
    } else if change < -SIGNAL_EPSILON {
        std::cmp::Ordering::Less
    } else {
        std::cmp::Ordering::Equal
    }
}

/// Derived money-flow figures for one symbol over one window.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SymbolMetrics {
    pub symbol: Symbol,
    pub intensity: f64,
    pub intensity_basis: IntensityBasis,
    /// Open interest growth from the window low, in base units.
    pub oi_growth_tokens: f64,
    /// Open interest growth from the window low, valued at the latest price.
    pub oi_growth_value: f64,
    pub price_change_pct: f64,
    pub oi_change_pct: f64,
    pub signal: Signal,
    pub current_price: f64,
    pub current_oi: f64,
    /// Market capitalisation used for tier A, if any.
    pub market_cap: Option<f64>,
}

impl SymbolMetrics {
    /// Compute metrics for `series`, or `None` if it has fewer than two observations.
    pub fn compute(series: &ObservationSeries, reference: Option<&ReferenceRecord>) -> Option<Self> {
        if series.len() < 2 {
            return None;
        }
        let (first, last) = (series.first()?, series.last()?);
        let baseline_oi = series.min_open_interest()?;

        let current_price = last.price;
        let current_oi = last.open_interest;
        let oi_growth_tokens = finite_or_zero(current_oi - baseline_oi).max(0.0);
        let oi_growth_value = finite_or_zero(oi_growth_tokens * current_price);

        let (intensity, intensity_basis) = intensity(
            oi_growth_tokens,
            oi_growth_value,
            baseline_oi,
            reference,
        );

        let price_change_pct = pct_change(first.price, current_price);
        let oi_change_pct = pct_change(first.open_interest, current_oi);

        Some(Self {
            symbol: series.symbol().clone(),
            intensity: finite_or_zero(intensity),
            intensity_basis,
            oi_growth_tokens,
            oi_growth_value,
            price_change_pct,
            oi_change_pct,
            signal: Signal::classify(price_change_pct, oi_change_pct),
            current_price,
            current_oi,
            market_cap: reference.and_then(ReferenceRecord::usable_market_cap),
        })
    }
}

fn intensity(
    growth_tokens: f64,
    growth_value: f64,
    baseline_oi: f64,
    reference: Option<&ReferenceRecord>,
) -> (f64, IntensityBasis) {
    if let Some(market_cap) = reference.and_then(ReferenceRecord::usable_market_cap) {
        (growth_value / market_cap, IntensityBasis::MarketCap)
    } else if let Some(supply) = reference.and_then(ReferenceRecord::usable_circulating_supply) {
        (growth_tokens / supply, IntensityBasis::CirculatingSupply)
    } else if baseline_oi > 0.0 {
        (
            growth_tokens / baseline_oi * PROXY_INTENSITY_WEIGHT,
            IntensityBasis::OpenInterestProxy,
        )
    } else {
        (0.0, IntensityBasis::Unavailable)
    }
}

/// Fractional change from `start` to `end`, or 0 when `start` is not positive.
pub fn pct_change(start: f64, end: f64) -> f64 {
    if start > 0.0 {
        finite_or_zero((end - start) / start)
    } else {
        0.0
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
