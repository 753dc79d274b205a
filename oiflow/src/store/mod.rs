use crate::error::DataWarning;

/// Reference data adapter.
pub mod reference;

/// Series store adapter.
pub mod series;

/// Symbol universe adapter.
pub mod universe;

pub use reference::ReferenceStore;
pub use series::SeriesStore;
pub use universe::SymbolUniverse;

/// Result of an adapter call that never fails outright: the value is complete, partial or
/// empty, and `warning` explains any degradation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub warning: Option<DataWarning>,
}

impl<T> Fetched<T> {
    pub fn complete(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    pub fn degraded(value: T, warning: DataWarning) -> Self {
        Self {
            value,
            warning: Some(warning),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }

    pub fn into_parts(self) -> (T, Option<DataWarning>) {
        (self.value, self.warning)
    }

    pub fn map<U, F>(self, op: F) -> Fetched<U>
    where
        F: FnOnce(T) -> U,
    {
        Fetched {
            value: op(self.value),
            warning: self.warning,
        }
    }

    /// Determine if the value degraded because a backend call failed, rather than because the
    /// backend returned thin data.
    pub fn is_backend_failure(&self) -> bool {
        self.warning
            .as_ref()
            .is_some_and(DataWarning::is_backend_failure)
    }
}
