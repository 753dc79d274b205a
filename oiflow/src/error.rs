use crate::model::Symbol;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single backend call made through one of the [`source`](crate::source) readers.
///
/// Adapters never hand these to callers of the engine; they are converted into a non-fatal
/// [`DataWarning`] and the affected data degrades to empty.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend connection failed: {0}")]
    Connection(String),

    #[error("backend query failed: {0}")]
    Query(String),

    #[error("backend task aborted: {0}")]
    Task(String),

    #[error("all {0} per-symbol reads failed")]
    AllSymbolsFailed(usize),
}

impl BackendError {
    /// Determine if the failure was caused by the call exceeding its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                Self::Connection(value.to_string())
            }
            _ => Self::Query(value.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Task(value.to_string())
    }
}

/// Backend a [`DataWarning`] originated from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
pub enum DataOrigin {
    #[display("symbol universe")]
    Universe,
    #[display("series store")]
    Series,
    #[display("reference data")]
    Reference,
}

/// Recoverable conditions raised while producing a [`Snapshot`](crate::monitor::Snapshot).
///
/// None of these are fatal: the worst outcome is an empty or partial ranking.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum DataWarning {
    #[error("{origin} unavailable: {reason}")]
    BackendUnavailable { origin: DataOrigin, reason: String },

    #[error("{origin} returned no rows")]
    EmptyResult { origin: DataOrigin },

    #[error("{symbol} has {points} point(s) and is excluded from ranking")]
    InsufficientSeries { symbol: Symbol, points: usize },

    #[error("reference data missing for {missing} of {ranked} ranked symbols")]
    StalePartialReference { missing: usize, ranked: usize },
}

impl DataWarning {
    pub fn unavailable(origin: DataOrigin, error: &BackendError) -> Self {
        Self::BackendUnavailable {
            origin,
            reason: error.to_string(),
        }
    }

    /// Determine if the warning leaves the ranking empty or partial rather than just less
    /// precise.
    #[allow(clippy::match_like_matches_macro)]
    pub fn degrades_ranking(&self) -> bool {
        match self {
            DataWarning::BackendUnavailable {
                origin: DataOrigin::Universe | DataOrigin::Series,
                ..
            } => true,
            DataWarning::EmptyResult {
                origin: DataOrigin::Universe | DataOrigin::Series,
            } => true,
            _ => false,
        }
    }

    /// Determine if the warning was caused by a failed backend call (as opposed to a successful
    /// call returning thin data). Snapshots carrying such warnings are never cached.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, DataWarning::BackendUnavailable { .. })
    }
}

/// Invalid configuration supplied through the environment or a builder.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
}
