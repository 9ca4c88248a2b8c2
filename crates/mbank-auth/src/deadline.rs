//! Deadlines for outbound calls
//!
//! Nothing in the pipeline may block indefinitely: every cache, store,
//! channel and provider call goes through one of these wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{AuthError, AuthResult};

/// Run a cache or store call under `limit`. Elapsed deadlines are internal
/// failures.
pub(crate) async fn store<T, E, F>(limit: Duration, op: &str, fut: F) -> AuthResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<AuthError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "store call timed out");
            Err(AuthError::Timeout(op.to_string()))
        }
    }
}

/// Run a channel or provider call under `limit`. Elapsed deadlines are
/// upstream failures.
pub(crate) async fn upstream<T, F>(limit: Duration, op: &str, fut: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "upstream call timed out");
            Err(AuthError::Upstream(format!("{} timed out", op)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbank_db::DbError;

    #[tokio::test(start_paused = true)]
    async fn test_store_deadline_is_internal() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DbError>(())
        };
        let err = store(Duration::from_secs(2), "cache.get", slow).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout(ref op) if op == "cache.get"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_deadline_is_upstream_failure() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let err = upstream(Duration::from_secs(2), "sms.send", slow).await.unwrap_err();
        assert!(matches!(err, AuthError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_errors_are_converted() {
        let failing = async { Err::<(), _>(DbError::Redis("refused".into())) };
        let err = store(Duration::from_secs(1), "cache.set", failing).await.unwrap_err();
        assert!(matches!(err, AuthError::Cache(_)));
    }
}
