use chrono::{Duration as ChronoDuration, Utc};
use oiflow::{
    FlowMonitor, MonitorConfig, Snapshot, Symbol, ViewKey,
    chart::ChartSeries,
    format::{compact_number, percent},
    ranking::RankedEntry,
    source::{
        ReferenceRow, SeriesRow,
        fanout::FanOutReader,
        sqlite::{SqliteSource, SqliteTables},
    },
};
use serde::Serialize;
use std::{process::ExitCode, sync::Arc, time::Duration};
use tracing::{error, info, warn};

const DEFAULT_DB_PATH: &str = "hyperliquid_data.db";

/// Report options read from the environment on top of [`MonitorConfig`].
#[derive(Debug, Clone)]
struct ReportOptions {
    db_path: String,
    demo: bool,
    fan_out: bool,
    json: bool,
    charts: bool,
    watch: Option<Duration>,
}

impl ReportOptions {
    fn from_env() -> Self {
        Self {
            db_path: std::env::var("OIFLOW_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            demo: env_flag("OIFLOW_DEMO"),
            fan_out: env_flag("OIFLOW_FANOUT"),
            json: std::env::var("OIFLOW_OUTPUT")
                .map(|output| output.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            charts: env_flag("OIFLOW_CHARTS"),
            watch: std::env::var("OIFLOW_WATCH_SECS")
                .ok()
                .and_then(|secs| secs.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let tables = match SqliteTables::from_env() {
        Ok(tables) => tables,
        Err(error) => {
            error!(%error, "invalid table configuration");
            return ExitCode::FAILURE;
        }
    };
    let options = ReportOptions::from_env();

    let source = match open_source(&options, tables) {
        Ok(source) => Arc::new(source),
        Err(error) => {
            error!(%error, path = %options.db_path, "failed to open database");
            return ExitCode::FAILURE;
        }
    };

    let monitor = if options.fan_out {
        info!(
            concurrency = config.fan_out_concurrency,
            "reading series with per-symbol fan-out"
        );
        let fan_out = FanOutReader::new(source.clone())
            .with_max_concurrency(config.fan_out_concurrency)
            .with_call_timeout(config.backend_timeout);
        FlowMonitor::new(source.clone(), Arc::new(fan_out), source, config)
    } else {
        FlowMonitor::from_source(source, config)
    };

    info!(
        universe_size = monitor.config().universe_size,
        window = ?monitor.config().window,
        "starting oiflow report"
    );

    let Some(period) = options.watch else {
        report(&monitor, &options).await;
        return ExitCode::SUCCESS;
    };

    watch(&monitor, &options, period, tokio::signal::ctrl_c()).await;
    ExitCode::SUCCESS
}

/// Repeat the report every `period` until `shutdown` resolves. A report in progress is
/// abandoned on shutdown.
async fn watch<Shutdown>(
    monitor: &FlowMonitor,
    options: &ReportOptions,
    period: Duration,
    shutdown: Shutdown,
) where
    Shutdown: Future,
{
    tokio::pin!(shutdown);

    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(stats = ?monitor.caches().stats(), "shutting down");
                return;
            }
            _ = watch_tick(&mut interval, monitor, options) => {}
        }
    }
}

async fn watch_tick(
    interval: &mut tokio::time::Interval,
    monitor: &FlowMonitor,
    options: &ReportOptions,
) {
    interval.tick().await;
    report(monitor, options).await;

    let purged = monitor.caches().purge_expired();
    if purged > 0 {
        info!(purged, "purged expired cache entries");
    }
}

fn open_source(
    options: &ReportOptions,
    tables: SqliteTables,
) -> Result<SqliteSource, oiflow::BackendError> {
    if options.demo {
        info!("seeding in-memory demo database");
        let source = SqliteSource::open_in_memory()?.with_tables(tables);
        seed_demo(&source)?;
        Ok(source)
    } else {
        Ok(SqliteSource::open(&options.db_path)?.with_tables(tables))
    }
}

async fn report(monitor: &FlowMonitor, options: &ReportOptions) {
    let snapshot = monitor.snapshot().await;

    for warning in &snapshot.warnings {
        warn!(%warning, "snapshot degraded");
    }

    if options.json {
        let charts = options
            .charts
            .then(|| chart_all(monitor, &snapshot))
            .unwrap_or_default();
        let output = JsonReport {
            snapshot: &snapshot,
            charts,
        };
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{json}"),
            Err(error) => error!(%error, "failed to serialise snapshot"),
        }
    } else {
        print_snapshot(&snapshot);
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    snapshot: &'a Snapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    charts: Vec<ChartSeries>,
}

fn chart_all(monitor: &FlowMonitor, snapshot: &Snapshot) -> Vec<ChartSeries> {
    snapshot
        .universe
        .iter()
        .filter_map(|symbol| monitor.chart(snapshot, symbol))
        .collect()
}

fn print_snapshot(snapshot: &Snapshot) {
    println!(
        "oiflow snapshot {} | {} symbols | {} ranked",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.universe.len(),
        snapshot.ranking.metrics.len()
    );

    for view in &snapshot.ranking.views {
        println!();
        println!("Top {} by {}", view.entries.len(), view.key);
        println!("{}", "-".repeat(48));
        for entry in &view.entries {
            println!("{}", format_entry(view.key, entry));
        }
    }

    if !snapshot.ranking.remainder.is_empty() {
        println!();
        println!(
            "Others: {}",
            snapshot
                .ranking
                .remainder
                .iter()
                .map(Symbol::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

fn format_entry(key: ViewKey, entry: &RankedEntry) -> String {
    let metrics = &entry.metrics;
    let label = format!("No.{:<3} {:<10}", entry.rank, entry.symbol().as_str());

    match key {
        ViewKey::Intensity => format!(
            "{label} {:>9}  MC: ${:<9} ({})",
            percent(metrics.intensity, 2),
            metrics.market_cap.map(compact_number).unwrap_or_else(|| "-".to_string()),
            metrics.intensity_basis,
        ),
        ViewKey::Growth => format!(
            "{label} +${:<9} {}",
            compact_number(metrics.oi_growth_value),
            metrics.signal
        ),
        ViewKey::PriceChange => format!(
            "{label} {:>9}  {}",
            percent(metrics.price_change_pct, 2),
            metrics.signal
        ),
        ViewKey::OiChange => format!(
            "{label} {:>9}  {}",
            percent(metrics.oi_change_pct, 2),
            metrics.signal
        ),
    }
}

/// Populate `source` with a small synthetic market ending now.
fn seed_demo(source: &SqliteSource) -> Result<(), oiflow::BackendError> {
    source.create_schema()?;

    let markets: [(&str, f64, f64, f64, Option<f64>); 6] = [
        ("BTC", 97_000.0, 28_000.0, 0.012, Some(1.9e12)),
        ("ETH", 3_400.0, 610_000.0, -0.004, Some(4.1e11)),
        ("SOL", 190.0, 4_200_000.0, 0.03, Some(9.0e10)),
        ("HYPE", 24.0, 21_000_000.0, 0.06, None),
        ("DOGE", 0.32, 2.1e9, -0.02, Some(4.7e10)),
        ("kPEPE", 0.018, 3.3e9, 0.09, None),
    ];

    let now = Utc::now();
    let mut rows = Vec::new();
    for (seed, (symbol, price, oi, drift, _)) in markets.iter().enumerate() {
        for step in 0..600_i64 {
            let phase = (step as f64 + seed as f64 * 13.0) / 40.0;
            let progress = step as f64 / 600.0;
            rows.push(SeriesRow {
                symbol: Symbol::new(symbol),
                time: now - ChronoDuration::minutes(600 - step),
                price: price * (1.0 + drift * progress + phase.sin() * 0.01),
                open_interest: oi * (1.0 + drift * 2.0 * progress + phase.cos() * 0.02),
            });
        }
    }
    source.insert_series_rows(&rows)?;

    let reference = markets
        .iter()
        .filter(|(symbol, ..)| *symbol != "kPEPE")
        .map(|(symbol, price, _, _, market_cap)| ReferenceRow {
            symbol: Symbol::new(symbol),
            circulating_supply: market_cap.map(|cap| cap / price),
            market_cap: *market_cap,
        })
        .collect::<Vec<_>>();
    source.insert_reference_rows(&reference)?;

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
