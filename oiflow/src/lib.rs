#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # Oiflow
//! Open-interest money-flow ranking over batched time-series reads.
//!
//! Oiflow fetches a window of `(time, price, open_interest)` observations for the most active
//! symbols in one round trip, derives per-symbol money-flow metrics, sorts them into ranked views
//! and prepares bounded-size series for charting. Every backend call is time-limited, and every
//! failure degrades the output (with a [`DataWarning`]) rather than failing it.
//!
//! ## Overview
//! * [`source`]: reader traits plus a SQLite backend and a bounded per-symbol fan-out adapter.
//! * [`store`]: adapters that turn raw reader output into [`ObservationSeries`] &
//!   [`ReferenceRecord`]s, converting backend errors into warnings.
//! * [`metric`]: intensity (with reference fallback tiers), growth, percentage changes and the
//!   directional [`Signal`].
//! * [`ranking`]: configurable views sorted by one metric each, plus the unranked remainder.
//! * [`downsample`]: stride reduction that always keeps the last observation.
//! * [`cache`]: TTL memoisation with per-key coalescing of concurrent misses.
//! * [`monitor`]: the [`FlowMonitor`] pipeline wiring all of the above into cached [`Snapshot`]s.
//!
//! ## Example
//! ```rust,no_run
//! use oiflow::{FlowMonitor, MonitorConfig, source::sqlite::SqliteSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(SqliteSource::open("hyperliquid_data.db").unwrap());
//!     let monitor = FlowMonitor::from_source(source, MonitorConfig::default());
//!
//!     let snapshot = monitor.snapshot().await;
//!     for view in &snapshot.ranking.views {
//!         for entry in &view.entries {
//!             println!("{} #{} {}", view.key, entry.rank, entry.symbol());
//!         }
//!     }
//! }
//! ```

/// TTL cache with per-key coalescing.
pub mod cache;

/// Chart-ready series & summaries.
pub mod chart;

/// [`MonitorConfig`] and environment loading.
pub mod config;

/// Bounded-size series reduction.
pub mod downsample;

/// Backend errors, recoverable data warnings and configuration errors.
pub mod error;

/// Compact number formatting for display.
pub mod format;

/// Per-symbol money-flow metrics.
pub mod metric;

/// Core observation & reference data types.
pub mod model;

/// Ranking pipeline orchestration.
pub mod monitor;

/// Ranked views over [`SymbolMetrics`].
pub mod ranking;

/// Backend reader traits and implementations.
pub mod source;

/// Adapters between readers and the engine.
pub mod store;

pub use config::{CacheTtls, MonitorConfig};
pub use error::{BackendError, ConfigError, DataOrigin, DataWarning};
pub use metric::{Signal, SymbolMetrics};
pub use model::{Observation, ObservationSeries, ReferenceRecord, Symbol};
pub use monitor::{FlowMonitor, MonitorCaches, Snapshot};
pub use ranking::{RankOrder, Ranking, RankingConfig, RankingEngine, ViewKey};
