use crate::{
    downsample::{DEFAULT_SLACK, DEFAULT_TARGET_POINTS, Downsampler},
    error::ConfigError,
    ranking::{RankOrder, RankingConfig, ViewKey},
    source::{
        TimeWindow, fanout::DEFAULT_FAN_OUT_CONCURRENCY, timeout::DEFAULT_BACKEND_TIMEOUT,
    },
};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Default number of most active symbols monitored.
pub const DEFAULT_UNIVERSE_SIZE: usize = 100;

/// Default per-symbol row cap.
pub const DEFAULT_ROW_LIMIT: usize = 4000;

/// Default recency sampling stride applied inside the row cap.
pub const DEFAULT_SAMPLE_STEP: usize = 4;

/// Time-to-live of each cached producer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct CacheTtls {
    pub universe: Duration,
    pub reference: Duration,
    pub series: Duration,
    pub snapshot: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            universe: Duration::from_secs(60),
            reference: Duration::from_secs(300),
            series: Duration::from_secs(60),
            snapshot: Duration::from_secs(60),
        }
    }
}

/// Configuration of a [`FlowMonitor`](crate::monitor::FlowMonitor).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorConfig {
    pub universe_size: usize,
    pub window: TimeWindow,
    pub ranking: RankingConfig,
    pub downsampler: Downsampler,
    pub ttls: CacheTtls,
    pub backend_timeout: Duration,
    pub fan_out_concurrency: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            universe_size: DEFAULT_UNIVERSE_SIZE,
            window: TimeWindow::latest_sampled(DEFAULT_ROW_LIMIT, DEFAULT_SAMPLE_STEP),
            ranking: RankingConfig::default(),
            downsampler: Downsampler::default(),
            ttls: CacheTtls::default(),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            fan_out_concurrency: DEFAULT_FAN_OUT_CONCURRENCY,
        }
    }
}

impl MonitorConfig {
    pub fn with_universe_size(mut self, universe_size: usize) -> Self {
        self.universe_size = universe_size;
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_downsampler(mut self, downsampler: Downsampler) -> Self {
        self.downsampler = downsampler;
        self
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn with_backend_timeout(mut self, backend_timeout: Duration) -> Self {
        self.backend_timeout = backend_timeout;
        self
    }

    pub fn with_fan_out_concurrency(mut self, fan_out_concurrency: usize) -> Self {
        self.fan_out_concurrency = fan_out_concurrency.max(1);
        self
    }

    /// Load configuration from `OIFLOW_*` environment variables, falling back to defaults for
    /// unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, eg/ a map in tests.
    ///
    /// Recognised keys:
    /// - `OIFLOW_UNIVERSE_SIZE`
    /// - `OIFLOW_WINDOW_HOURS` (takes precedence over the row cap when set)
    /// - `OIFLOW_ROW_LIMIT`, `OIFLOW_SAMPLE_STEP`
    /// - `OIFLOW_TOP_N`, `OIFLOW_RANK_ORDER` (`signed` | `magnitude`), `OIFLOW_VIEWS`
    ///   (comma separated, eg/ `intensity,growth`)
    /// - `OIFLOW_CHART_POINTS`, `OIFLOW_CHART_SLACK`
    /// - `OIFLOW_TTL_UNIVERSE_SECS`, `OIFLOW_TTL_REFERENCE_SECS`, `OIFLOW_TTL_SERIES_SECS`,
    ///   `OIFLOW_TTL_SNAPSHOT_SECS`
    /// - `OIFLOW_BACKEND_TIMEOUT_SECS`, `OIFLOW_FANOUT_CONCURRENCY`
    pub fn from_lookup<Lookup>(lookup: Lookup) -> Result<Self, ConfigError>
    where
        Lookup: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env(lookup);

        let window = match env.parse::<u64>("OIFLOW_WINDOW_HOURS")? {
            Some(0) => return Err(env.invalid("OIFLOW_WINDOW_HOURS", "window must be non-zero")),
            Some(hours) => TimeWindow::recent_hours(hours)
                .ok_or_else(|| env.invalid("OIFLOW_WINDOW_HOURS", "window is too large"))?,
            None => match env.parse::<usize>("OIFLOW_ROW_LIMIT")? {
                Some(0) => {
                    return Err(env.invalid("OIFLOW_ROW_LIMIT", "row limit must be non-zero"));
                }
                limit => TimeWindow::latest_sampled(
                    limit.unwrap_or(DEFAULT_ROW_LIMIT),
                    env.parse::<usize>("OIFLOW_SAMPLE_STEP")?.unwrap_or(DEFAULT_SAMPLE_STEP),
                ),
            },
        };

        let views = match env.get("OIFLOW_VIEWS") {
            Some(raw) => raw
                .split(',')
                .filter(|view| !view.trim().is_empty())
                .map(|view| {
                    view.parse::<ViewKey>()
                        .map_err(|reason| invalid("OIFLOW_VIEWS", &raw, reason))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.ranking.views,
        };

        let ranking = RankingConfig {
            views,
            top_n: env.parse::<usize>("OIFLOW_TOP_N")?.unwrap_or(defaults.ranking.top_n),
            order: env
                .parse::<RankOrder>("OIFLOW_RANK_ORDER")?
                .unwrap_or(defaults.ranking.order),
        };

        let slack = env.parse::<f64>("OIFLOW_CHART_SLACK")?.unwrap_or(DEFAULT_SLACK);
        if slack.is_nan() || slack < 1.0 {
            return Err(env.invalid("OIFLOW_CHART_SLACK", "slack must be at least 1.0"));
        }
        let downsampler = Downsampler::new(
            env.parse::<usize>("OIFLOW_CHART_POINTS")?.unwrap_or(DEFAULT_TARGET_POINTS),
            slack,
        );

        let ttls = CacheTtls {
            universe: env
                .seconds("OIFLOW_TTL_UNIVERSE_SECS")?
                .unwrap_or(defaults.ttls.universe),
            reference: env
                .seconds("OIFLOW_TTL_REFERENCE_SECS")?
                .unwrap_or(defaults.ttls.reference),
            series: env
                .seconds("OIFLOW_TTL_SERIES_SECS")?
                .unwrap_or(defaults.ttls.series),
            snapshot: env
                .seconds("OIFLOW_TTL_SNAPSHOT_SECS")?
                .unwrap_or(defaults.ttls.snapshot),
        };

        Ok(Self {
            universe_size: env
                .parse::<usize>("OIFLOW_UNIVERSE_SIZE")?
                .unwrap_or(defaults.universe_size),
            window,
            ranking,
            downsampler,
            ttls,
            backend_timeout: env
                .seconds("OIFLOW_BACKEND_TIMEOUT_SECS")?
                .unwrap_or(defaults.backend_timeout),
            fan_out_concurrency: env
                .parse::<usize>("OIFLOW_FANOUT_CONCURRENCY")?
                .unwrap_or(defaults.fan_out_concurrency)
                .max(1),
        })
    }
}

struct Env<Lookup>(Lookup);

impl<Lookup> Env<Lookup>
where
    Lookup: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|error| invalid(key, &raw, error))
            })
            .transpose()
    }

    fn seconds(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }

    fn invalid(&self, key: &'static str, reason: &str) -> ConfigError {
        invalid(key, &self.get(key).unwrap_or_default(), reason)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnv::FnvHashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<FnvHashMap<_, _>>();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_defaults() {
        let actual = MonitorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(actual, MonitorConfig::default());
        assert_eq!(
            actual.window,
            TimeWindow::Latest {
                limit: 4000,
                sample_step: 4
            }
        );
        assert_eq!(actual.ttls.reference, Duration::from_secs(300));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let actual = MonitorConfig::from_lookup(lookup(&[
            ("OIFLOW_UNIVERSE_SIZE", "25"),
            ("OIFLOW_WINDOW_HOURS", "24"),
            ("OIFLOW_ROW_LIMIT", "ignored"),
            ("OIFLOW_TOP_N", " 5 "),
            ("OIFLOW_RANK_ORDER", "magnitude"),
            ("OIFLOW_VIEWS", "growth, oi_change"),
            ("OIFLOW_CHART_POINTS", "200"),
            ("OIFLOW_TTL_SNAPSHOT_SECS", "15"),
            ("OIFLOW_FANOUT_CONCURRENCY", "0"),
        ]));

        // Row limit is not consulted once a time window is set
        let actual = actual.unwrap();
        assert_eq!(actual.universe_size, 25);
        assert_eq!(actual.window, TimeWindow::Recent(Duration::from_secs(24 * 3600)));
        assert_eq!(
            actual.ranking,
            RankingConfig {
                views: vec![ViewKey::Growth, ViewKey::OiChange],
                top_n: 5,
                order: RankOrder::Magnitude,
            }
        );
        assert_eq!(actual.downsampler, Downsampler::new(200, 1.5));
        assert_eq!(actual.ttls.snapshot, Duration::from_secs(15));
        assert_eq!(actual.ttls.universe, Duration::from_secs(60));
        assert_eq!(actual.fan_out_concurrency, 1);
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        struct TestCase {
            input: (&'static str, &'static str),
            expected_key: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0
                input: ("OIFLOW_TOP_N", "ten"),
                expected_key: "OIFLOW_TOP_N",
            },
            TestCase {
                // TC1
                input: ("OIFLOW_RANK_ORDER", "sideways"),
                expected_key: "OIFLOW_RANK_ORDER",
            },
            TestCase {
                // TC2
                input: ("OIFLOW_VIEWS", "intensity,volume"),
                expected_key: "OIFLOW_VIEWS",
            },
            TestCase {
                // TC3
                input: ("OIFLOW_CHART_SLACK", "0.5"),
                expected_key: "OIFLOW_CHART_SLACK",
            },
            TestCase {
                // TC4
                input: ("OIFLOW_WINDOW_HOURS", "0"),
                expected_key: "OIFLOW_WINDOW_HOURS",
            },
            TestCase {
                // TC5
                input: ("OIFLOW_BACKEND_TIMEOUT_SECS", "-3"),
                expected_key: "OIFLOW_BACKEND_TIMEOUT_SECS",
            },
            TestCase {
                // TC6
                input: ("OIFLOW_ROW_LIMIT", "0"),
                expected_key: "OIFLOW_ROW_LIMIT",
            },
            TestCase {
                // TC7: hours overflow a Duration of seconds
                input: ("OIFLOW_WINDOW_HOURS", "18446744073709551615"),
                expected_key: "OIFLOW_WINDOW_HOURS",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = MonitorConfig::from_lookup(lookup(&[test.input]));
            match actual {
                Err(ConfigError::InvalidValue { key, value, .. }) => {
                    assert_eq!(key, test.expected_key, "TC{} failed", index);
                    assert_eq!(value, test.input.1, "TC{} failed", index);
                }
                other => panic!("TC{index} failed: {other:?}"),
            }
        }
    }

    #[test]
    fn test_builders() {
        let config = MonitorConfig::default()
            .with_universe_size(10)
            .with_window(TimeWindow::latest(50))
            .with_fan_out_concurrency(0)
            .with_backend_timeout(Duration::from_secs(3));

        assert_eq!(config.universe_size, 10);
        assert_eq!(config.window.row_cap(), Some(50));
        assert_eq!(config.fan_out_concurrency, 1);
        assert_eq!(config.backend_timeout, Duration::from_secs(3));
    }
}
