//! Nonce Guard
//!
//! Single-use replay protection. The first request carrying a nonce claims
//! `"{nonce}:xsession"` in the cache for the anti-replay window; any later
//! request with the same nonce inside that window is a replay. The claim is
//! a single atomic set-if-absent, so two concurrent duplicates cannot both
//! pass.

use std::sync::Arc;
use std::time::Duration;

use mbank_db::cache::{keys, ACTIVE};
use mbank_db::CacheStore;

use crate::deadline;
use crate::error::{AuthError, AuthResult};

/// Rejects reuse of a nonce within the anti-replay window
#[derive(Clone)]
pub struct NonceGuard {
    cache: Arc<dyn CacheStore>,
    window: Duration,
    timeout: Duration,
}

impl NonceGuard {
    pub fn new(cache: Arc<dyn CacheStore>, window: Duration, timeout: Duration) -> Self {
        Self {
            cache,
            window,
            timeout,
        }
    }

    /// Claim `nonce`, failing with [`AuthError::ReplayDetected`] if it is
    /// still held from an earlier request.
    pub async fn check(&self, nonce: &str) -> AuthResult<()> {
        let nonce = nonce.trim();
        if nonce.is_empty() {
            return Err(AuthError::MissingHeader("X-NONCE".to_string()));
        }

        let key = keys::nonce(nonce);
        let claimed = deadline::store(
            self.timeout,
            "cache.nonce",
            self.cache.set_nx(&key, ACTIVE, self.window),
        )
        .await?;

        if !claimed {
            tracing::warn!(nonce, "nonce replay rejected");
            return Err(AuthError::ReplayDetected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbank_db::mock::MemoryCache;

    fn guard() -> NonceGuard {
        NonceGuard::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
            Duration::from_secs(2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_use_rejected_within_window() {
        let guard = guard();
        guard.check("1718000000").await.unwrap();

        let result = guard.check("1718000000").await;
        assert!(matches!(result, Err(AuthError::ReplayDetected)));
        assert_eq!(result.unwrap_err().error_code(), "REPLAY_DETECTED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_again_after_window() {
        let guard = guard();
        guard.check("n-1").await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(guard.check("n-1").await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(guard.check("n-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_nonces_independent() {
        let guard = guard();
        guard.check("a").await.unwrap();
        guard.check("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_admit_one() {
        let guard = guard();
        let attempts = (0..16).map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move { guard.check("race").await.is_ok() })
        });
        let admitted = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_empty_nonce_is_missing_header() {
        let result = guard().check("  ").await;
        assert!(matches!(result, Err(AuthError::MissingHeader(ref h)) if h == "X-NONCE"));
    }
}
