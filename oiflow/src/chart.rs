use crate::{
    downsample::Downsampler,
    metric::{Signal, SymbolMetrics},
    model::{Observation, ObservationSeries, Symbol},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Intensity above which a symbol is highlighted as hot.
pub const HOT_INTENSITY: f64 = 0.05;

/// Intensity above which a symbol is highlighted as warm.
pub const WARM_INTENSITY: f64 = 0.01;

/// Direction of price over the charted window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PriceTrend {
    #[display("up")]
    Up,
    #[display("down")]
    Down,
}

impl PriceTrend {
    /// `Up` when the window closes at or above where it opened.
    pub fn of(series: &ObservationSeries) -> Option<Self> {
        let (first, last) = (series.first()?, series.last()?);
        Some(if last.price >= first.price {
            PriceTrend::Up
        } else {
            PriceTrend::Down
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Heat {
    #[display("hot")]
    Hot,
    #[display("warm")]
    Warm,
    #[display("cool")]
    Cool,
}

impl Heat {
    pub fn of(intensity: f64) -> Self {
        if intensity > HOT_INTENSITY {
            Heat::Hot
        } else if intensity > WARM_INTENSITY {
            Heat::Warm
        } else {
            Heat::Cool
        }
    }
}

/// Scalar fields displayed next to a chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSummary {
    pub intensity: f64,
    pub heat: Heat,
    pub oi_growth_value: f64,
    pub market_cap: Option<f64>,
    pub signal: Signal,
}

impl From<&SymbolMetrics> for ChartSummary {
    fn from(metrics: &SymbolMetrics) -> Self {
        Self {
            intensity: metrics.intensity,
            heat: Heat::of(metrics.intensity),
            oi_growth_value: metrics.oi_growth_value,
            market_cap: metrics.market_cap,
            signal: metrics.signal,
        }
    }
}

/// Bounded, time-ascending series ready for a chart renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub symbol: Symbol,
    pub series: Arc<ObservationSeries>,
    /// Price direction over the full, un-reduced window.
    pub trend: Option<PriceTrend>,
    /// Present only for symbols that were ranked.
    pub summary: Option<ChartSummary>,
}

impl ChartSeries {
    pub fn build(
        series: &Arc<ObservationSeries>,
        metrics: Option<&SymbolMetrics>,
        downsampler: &Downsampler,
    ) -> Self {
        Self {
            symbol: series.symbol().clone(),
            series: downsampler.reduce(series),
            trend: PriceTrend::of(series),
            summary: metrics.map(ChartSummary::from),
        }
    }

    pub fn points(&self) -> &[Observation] {
        self.series.points()
    }
}
