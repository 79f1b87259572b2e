//! Deadlines for collaborator calls
//!
//! Every call to the document store, the embedding provider, and the
//! completion provider goes through [`with_timeout`]. When the timer wins the
//! future is dropped: remote work that cannot be cancelled may keep running,
//! but nothing waits for it any more.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Race `operation` against `timeout`
///
/// Returns `Error::UpstreamTimeout` tagged with `label` if the deadline passes first.
pub async fn with_timeout<F, T>(operation: F, timeout: Duration, label: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("{} timed out after {:?}", label, timeout);
            Err(Error::timeout(label, timeout))
        }
    }
}

/// [`with_timeout`] with one extra attempt after a timeout
///
/// Only deadline expiries are retried; any other error is returned as-is.
/// Meant for cheap, idempotent reads.
pub async fn with_timeout_retry<F, Fut, T>(operation: F, timeout: Duration, label: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match with_timeout(operation(), timeout, label).await {
        Err(e) if e.is_timeout() => {
            tracing::debug!("Retrying {} once after timeout", label);
            with_timeout(operation(), timeout, label).await
        }
        other => other,
    }
}
