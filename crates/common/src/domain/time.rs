use crate::domain::result::{DomainError, DomainResult};
use chrono::{DateTime, Timelike, Utc};
use std::future::Future;
use std::time::Duration;

/// Truncate a timestamp to millisecond resolution.
///
/// Dedup tuples are compared on the truncated value, so two readings that only
/// differ below the millisecond collapse into one record.
/// Works over chrono's whole range, including instants that do not fit in
/// i64 nanoseconds since the epoch.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = ts.nanosecond();
    // Only lowers the sub-second field, which never leaves the valid range
    ts.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(ts)
}

/// Run a collaborator call with an upper bound on its duration.
///
/// An elapsed deadline surfaces as [`DomainError::Timeout`] and the caller
/// handles it like any other error from that call.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::Timeout {
            operation,
            timeout_ms: timeout.as_millis(),
        }),
    }
}
