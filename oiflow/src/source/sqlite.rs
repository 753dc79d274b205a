use super::{
    ReferenceReader, ReferenceRow, SeriesReader, SeriesRow, SymbolLister, SymbolSeriesReader,
    TimeWindow,
};
use crate::{
    error::{BackendError, ConfigError},
    model::Symbol,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params, params_from_iter, types::Value};
use std::{path::Path, sync::Arc};
use tracing::debug;

/// Default name of the table holding `(symbol, time, price, oi, oi_usd)` observations.
pub const DEFAULT_SERIES_TABLE: &str = "hyperliquid";

/// Default name of the table holding `(symbol, circulating_supply, market_cap)` rows.
pub const DEFAULT_REFERENCE_TABLE: &str = "circulating_supply";

/// Table names used by a [`SqliteSource`], validated as plain SQL identifiers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SqliteTables {
    series: String,
    reference: String,
}

impl SqliteTables {
    pub fn new(
        series: impl Into<String>,
        reference: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            series: validate_identifier(series.into())?,
            reference: validate_identifier(reference.into())?,
        })
    }

    /// Table names from `OIFLOW_SERIES_TABLE` and `OIFLOW_REFERENCE_TABLE`, falling back to
    /// [`DEFAULT_SERIES_TABLE`] and [`DEFAULT_REFERENCE_TABLE`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<Lookup>(lookup: Lookup) -> Result<Self, ConfigError>
    where
        Lookup: Fn(&str) -> Option<String>,
    {
        let table = |key: &str, default: &str| {
            lookup(key)
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self::new(
            table("OIFLOW_SERIES_TABLE", DEFAULT_SERIES_TABLE),
            table("OIFLOW_REFERENCE_TABLE", DEFAULT_REFERENCE_TABLE),
        )
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl Default for SqliteTables {
    fn default() -> Self {
        Self {
            series: DEFAULT_SERIES_TABLE.to_string(),
            reference: DEFAULT_REFERENCE_TABLE.to_string(),
        }
    }
}

fn validate_identifier(identifier: String) -> Result<String, ConfigError> {
    let valid = !identifier.is_empty()
        && !identifier.starts_with(|c: char| c.is_ascii_digit())
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(identifier)
    } else {
        Err(ConfigError::InvalidIdentifier(identifier))
    }
}

/// SQLite implementation of [`SeriesReader`], [`SymbolSeriesReader`], [`SymbolLister`] and
/// [`ReferenceReader`].
///
/// Queries run on the blocking thread pool against a single shared connection. Timestamps are
/// stored as epoch milliseconds.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
    tables: SqliteTables,
}

impl SqliteSource {
    /// Open an existing database file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(path, flags)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tables: SqliteTables::default(),
        }
    }

    pub fn with_tables(mut self, tables: SqliteTables) -> Self {
        self.tables = tables;
        self
    }

    pub fn tables(&self) -> &SqliteTables {
        &self.tables
    }

    /// Create both tables (and the series lookup index) if they do not exist.
    pub fn create_schema(&self) -> Result<(), BackendError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{series}\" (
                symbol TEXT NOT NULL,
                time INTEGER NOT NULL,
                price REAL NOT NULL,
                oi REAL NOT NULL,
                oi_usd REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"{series}_symbol_time\" ON \"{series}\" (symbol, time);
            CREATE TABLE IF NOT EXISTS \"{reference}\" (
                symbol TEXT PRIMARY KEY,
                circulating_supply REAL,
                market_cap REAL
            );",
            series = self.tables.series,
            reference = self.tables.reference,
        );
        self.conn.lock().execute_batch(&sql)?;
        Ok(())
    }

    /// Insert observation rows; `oi_usd` is derived as `open_interest * price`.
    pub fn insert_series_rows(&self, rows: &[SeriesRow]) -> Result<usize, BackendError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{}\" (symbol, time, price, oi, oi_usd) VALUES (?1, ?2, ?3, ?4, ?5)",
                self.tables.series
            ))?;
            for row in rows {
                stmt.execute(params![
                    row.symbol.as_str(),
                    row.time.timestamp_millis(),
                    row.price,
                    row.open_interest,
                    row.open_interest * row.price,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Insert or replace reference rows.
    pub fn insert_reference_rows(&self, rows: &[ReferenceRow]) -> Result<usize, BackendError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO \"{}\" (symbol, circulating_supply, market_cap) VALUES (?1, ?2, ?3)",
                self.tables.reference
            ))?;
            for row in rows {
                stmt.execute(params![
                    row.symbol.as_str(),
                    row.circulating_supply,
                    row.market_cap
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Run `query` against the shared connection on the blocking thread pool.
    async fn blocking<T, Query>(&self, query: Query) -> Result<T, BackendError>
    where
        T: Send + 'static,
        Query: FnOnce(&Connection) -> Result<T, BackendError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            query(&conn)
        })
        .await?
    }
}

fn series_query(table: &str, symbols: &[Symbol], window: TimeWindow) -> (String, Vec<Value>) {
    let placeholders = vec!["?"; symbols.len()].join(", ");
    let mut values = symbols
        .iter()
        .map(|symbol| Value::Text(symbol.to_string()))
        .collect::<Vec<_>>();

    let sql = match window {
        TimeWindow::Latest { limit, .. } => {
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            values.push(Value::Integer(window.sample_step() as i64));
            format!(
                "WITH ranked AS (
                    SELECT symbol, time, price, oi,
                           ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY time DESC) AS rn
                    FROM \"{table}\"
                    WHERE symbol IN ({placeholders})
                )
                SELECT symbol, time, price, oi
                FROM ranked
                WHERE rn <= ? AND (rn = 1 OR rn % ? = 0)
                ORDER BY symbol, time ASC"
            )
        }
        TimeWindow::Recent(_) => {
            let cutoff = window
                .cutoff(Utc::now())
                .map(|cutoff| cutoff.timestamp_millis())
                .unwrap_or(i64::MIN);
            values.push(Value::Integer(cutoff));
            format!(
                "SELECT symbol, time, price, oi
                FROM \"{table}\"
                WHERE symbol IN ({placeholders}) AND time >= ?
                ORDER BY symbol, time ASC"
            )
        }
    };

    (sql, values)
}

fn query_series(
    conn: &Connection,
    sql: &str,
    values: &[Value],
) -> Result<Vec<SeriesRow>, BackendError> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let total = raw.len();
    let rows = raw
        .into_iter()
        .filter_map(|(symbol, time_ms, price, open_interest)| {
            let time = DateTime::<Utc>::from_timestamp_millis(time_ms)?;
            Some(SeriesRow {
                symbol: Symbol::from(symbol),
                time,
                price,
                open_interest,
            })
        })
        .collect::<Vec<_>>();

    if rows.len() < total {
        debug!(
            dropped = total - rows.len(),
            "dropped rows with out of range timestamps"
        );
    }

    Ok(rows)
}

#[async_trait]
impl SeriesReader for SqliteSource {
    async fn read(
        &self,
        symbols: &[Symbol],
        window: TimeWindow,
    ) -> Result<Vec<SeriesRow>, BackendError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let (sql, values) = series_query(&self.tables.series, symbols, window);
        self.blocking(move |conn| query_series(conn, &sql, &values))
            .await
    }
}

#[async_trait]
impl SymbolSeriesReader for SqliteSource {
    async fn read_symbol(
        &self,
        symbol: &Symbol,
        window: TimeWindow,
    ) -> Result<Vec<SeriesRow>, BackendError> {
        self.read(std::slice::from_ref(symbol), window).await
    }
}

#[async_trait]
impl SymbolLister for SqliteSource {
    async fn list_symbols_by_activity(&self) -> Result<Vec<Symbol>, BackendError> {
        let sql = format!(
            "SELECT symbol FROM \"{}\" GROUP BY symbol ORDER BY MAX(oi_usd) DESC",
            self.tables.series
        );
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let symbols = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|symbol| symbol.map(Symbol::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(symbols)
        })
        .await
    }
}

#[async_trait]
impl ReferenceReader for SqliteSource {
    async fn read_all(&self) -> Result<Vec<ReferenceRow>, BackendError> {
        let sql = format!(
            "SELECT symbol, circulating_supply, market_cap FROM \"{}\"",
            self.tables.reference
        );
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ReferenceRow {
                        symbol: Symbol::from(row.get::<_, String>(0)?),
                        circulating_supply: row.get::<_, Option<f64>>(1)?,
                        market_cap: row.get::<_, Option<f64>>(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_utils::time;

    fn row(symbol: &str, minute: i64, price: f64, open_interest: f64) -> SeriesRow {
        SeriesRow {
            symbol: Symbol::new(symbol),
            time: time(minute),
            price,
            open_interest,
        }
    }

    fn seeded() -> SqliteSource {
        let source = SqliteSource::open_in_memory().unwrap();
        source.create_schema().unwrap();

        let mut rows = Vec::new();
        for minute in 0..10 {
            rows.push(row("BTC", minute, 100.0 + minute as f64, 1_000.0));
            rows.push(row("ETH", minute, 10.0, 50.0 + minute as f64));
        }
        rows.push(row("DOGE", 0, 0.1, 10.0));
        source.insert_series_rows(&rows).unwrap();
        source
    }

    #[tokio::test]
    async fn test_read_latest_caps_rows_per_symbol() {
        let source = seeded();
        let symbols = vec![Symbol::new("BTC"), Symbol::new("ETH")];

        let rows = source.read(&symbols, TimeWindow::latest(3)).await.unwrap();

        let btc = rows
            .iter()
            .filter(|row| row.symbol == "BTC")
            .map(|row| row.time)
            .collect::<Vec<_>>();
        assert_eq!(btc, vec![time(7), time(8), time(9)]);
        assert_eq!(rows.iter().filter(|row| row.symbol == "ETH").count(), 3);
        assert!(rows.iter().all(|row| row.symbol != "DOGE"));
    }

    #[tokio::test]
    async fn test_read_latest_sampled_keeps_newest_and_every_nth() {
        let source = seeded();

        let rows = source
            .read(&[Symbol::new("BTC")], TimeWindow::latest_sampled(8, 3))
            .await
            .unwrap();

        // Recency ranks kept: 1 (minute 9), 3 (minute 7), 6 (minute 4)
        let minutes = rows.iter().map(|row| row.time).collect::<Vec<_>>();
        assert_eq!(minutes, vec![time(4), time(7), time(9)]);
    }

    #[tokio::test]
    async fn test_read_recent_window_filters_by_cutoff() {
        let source = SqliteSource::open_in_memory().unwrap();
        source.create_schema().unwrap();

        let now = Utc::now();
        let old = SeriesRow {
            symbol: Symbol::new("BTC"),
            time: now - chrono::Duration::hours(30),
            price: 1.0,
            open_interest: 1.0,
        };
        let fresh = SeriesRow {
            time: now - chrono::Duration::hours(1),
            ..old.clone()
        };
        source.insert_series_rows(&[old, fresh.clone()]).unwrap();

        let rows = source
            .read(&[Symbol::new("BTC")], TimeWindow::recent_hours(24).unwrap())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time.timestamp_millis(), fresh.time.timestamp_millis());
    }

    #[tokio::test]
    async fn test_list_symbols_by_activity_orders_by_peak_notional() {
        let source = seeded();

        let symbols = source.list_symbols_by_activity().await.unwrap();

        // BTC peaks at 109 * 1000, ETH at 10 * 59, DOGE at 0.1 * 10
        assert_eq!(
            symbols,
            vec![Symbol::new("BTC"), Symbol::new("ETH"), Symbol::new("DOGE")]
        );
    }

    #[tokio::test]
    async fn test_read_all_reference_with_nulls() {
        let source = seeded();
        source
            .insert_reference_rows(&[
                ReferenceRow {
                    symbol: Symbol::new("BTC"),
                    circulating_supply: Some(19_000_000.0),
                    market_cap: Some(1.2e12),
                },
                ReferenceRow {
                    symbol: Symbol::new("ETH"),
                    circulating_supply: Some(120_000_000.0),
                    market_cap: None,
                },
            ])
            .unwrap();

        let mut rows = source.read_all().await.unwrap();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].symbol, "ETH");
        assert_eq!(rows[1].market_cap, None);
        assert_eq!(rows[1].circulating_supply, Some(120_000_000.0));
    }

    #[tokio::test]
    async fn test_missing_table_is_a_query_error() {
        let source = SqliteSource::open_in_memory().unwrap();

        let actual = source.read(&[Symbol::new("BTC")], TimeWindow::latest(3)).await;

        assert!(matches!(actual, Err(BackendError::Query(_))));
    }

    #[test]
    fn test_table_identifier_validation() {
        struct TestCase {
            input: &'static str,
            valid: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: default style
                input: "hyperliquid",
                valid: true,
            },
            TestCase {
                // TC1: underscores and digits
                input: "oi_v2",
                valid: true,
            },
            TestCase {
                // TC2: injection attempt
                input: "oi\"; DROP TABLE x; --",
                valid: false,
            },
            TestCase {
                // TC3: leading digit
                input: "2024_oi",
                valid: false,
            },
            TestCase {
                // TC4: empty
                input: "",
                valid: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = SqliteTables::new(test.input, DEFAULT_REFERENCE_TABLE).is_ok();
            assert_eq!(actual, test.valid, "TC{} failed", index);
        }
    }

    #[test]
    fn test_tables_from_lookup() {
        let defaults = SqliteTables::from_lookup(|_| None).unwrap();
        assert_eq!(defaults, SqliteTables::default());

        let custom = SqliteTables::from_lookup(|key| match key {
            "OIFLOW_SERIES_TABLE" => Some(" binance_oi ".to_string()),
            "OIFLOW_REFERENCE_TABLE" => Some(String::new()),
            _ => None,
        })
        .unwrap();
        assert_eq!(custom.series(), "binance_oi");
        assert_eq!(custom.reference(), DEFAULT_REFERENCE_TABLE);

        let invalid = SqliteTables::from_lookup(|key| {
            (key == "OIFLOW_REFERENCE_TABLE").then(|| "supply; --".to_string())
        });
        assert_eq!(
            invalid,
            Err(ConfigError::InvalidIdentifier("supply; --".to_string()))
        );
    }

    #[tokio::test]
    async fn test_custom_tables_round_trip() {
        let tables = SqliteTables::new("binance_oi", "binance_supply").unwrap();
        let source = SqliteSource::open_in_memory().unwrap().with_tables(tables);
        source.create_schema().unwrap();
        source
            .insert_series_rows(&[row("BTC", 0, 1.0, 2.0), row("BTC", 1, 1.5, 3.0)])
            .unwrap();
        source
            .insert_reference_rows(&[ReferenceRow {
                symbol: Symbol::new("BTC"),
                circulating_supply: None,
                market_cap: Some(5.0),
            }])
            .unwrap();

        let rows = source.read(&[Symbol::new("BTC")], TimeWindow::latest(5)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.read_all().await.unwrap().len(), 1);
        assert_eq!(source.tables().series(), "binance_oi");
    }
}
