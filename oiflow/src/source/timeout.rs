//! Deadline handling for backend calls.
//!
//! Every read issued by the adapters goes through [`with_timeout`], so a stalled backend
//! degrades to an empty result instead of blocking the pipeline. This matters for silent
//! connection failures that never surface as explicit errors.

use crate::error::BackendError;
use std::{future::Future, time::Duration};

/// Default deadline for a single backend call (10 seconds).
/// If the backend has not answered within this period the call is abandoned.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `call`, failing with [`BackendError::Timeout`] once `timeout` elapses.
///
/// The abandoned future is dropped; for blocking backends the underlying work may still run to
/// completion on its own thread.
pub async fn with_timeout<T, Fut>(timeout: Duration, call: Fut) -> Result<T, BackendError>
where
    Fut: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "backend call timed out - treating result as unavailable"
            );
            Err(BackendError::Timeout(timeout))
        }
    }
}
