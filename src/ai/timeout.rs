//! Timeout helpers
//!
//! Every external call in the pipeline is bounded twice: by its own budget and
//! by whatever remains of the overall analysis deadline. A timeout surfaces as
//! [`ForgeError::Timeout`] and is handled like any other stage failure.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{ForgeError, Result};

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ForgeError::timeout(operation_name, timeout)),
    }
}

/// Execute an async operation with a timeout, wrapping a non-Result output
pub async fn with_timeout_map<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(ForgeError::timeout(operation_name, timeout)),
    }
}

/// Budget for the next call: the smaller of the per-call budget and the time
/// left before `deadline`. Returns `None` once the deadline has passed.
pub fn remaining_budget(per_call: Duration, deadline: Instant) -> Option<Duration> {
    let left = deadline.checked_duration_since(Instant::now())?;
    if left.is_zero() {
        return None;
    }
    Some(per_call.min(left))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, ForgeError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ForgeError>(42)
            },
            "slow operation",
        )
        .await;
        assert!(matches!(result.unwrap_err(), ForgeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_with_timeout_map() {
        let value = with_timeout_map(Duration::from_secs(1), async { "done" }, "map")
            .await
            .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn test_remaining_budget() {
        let deadline = Instant::now() + Duration::from_secs(10);
        let budget = remaining_budget(Duration::from_secs(300), deadline).unwrap();
        assert!(budget <= Duration::from_secs(10));

        let budget = remaining_budget(Duration::from_secs(2), deadline).unwrap();
        assert_eq!(budget, Duration::from_secs(2));

        let past = Instant::now() - Duration::from_millis(5);
        assert!(remaining_budget(Duration::from_secs(1), past).is_none());
    }
}
