//! Deadline utilities for remote calls
//!
//! Every call to the collector is bounded by the configured upstream timeout
//! (`collector.upstream_timeout_secs`). Elapsed deadlines are reported as
//! `DeadlineExceeded`, which the channel manager does not classify as a
//! network error.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::remote::status::RpcError;

/// Default per-call deadline when none is configured
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for DNS lookups of the collector host
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a remote call with a deadline
pub async fn with_deadline<F, T>(deadline: Duration, call: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::deadline_exceeded(format!(
            "call did not complete within {:?}",
            deadline
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::status::StatusCode;

    #[tokio::test]
    async fn test_deadline_passes_result_through() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, RpcError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_deadline_elapsed() {
        let result: Result<(), RpcError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), StatusCode::DeadlineExceeded);
        assert!(!err.is_network_error());
    }
}
