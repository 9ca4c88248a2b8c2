//! Rate Limiting Service
//!
//! Token bucket per client key (normally the real client IP). The limiter is
//! an ordinary value owned by the application state and handed to the
//! middleware, so tests and multiple instances each get their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::{AuthError, AuthResult};

/// Rate limiter service
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
}

/// One client's bucket
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Whole and fractional tokens available
    tokens: f64,
    /// Last time tokens were topped up
    refilled_at: Instant,
    /// Last time the bucket was touched
    last_seen: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Take one token for `key`, or fail with the time until one is available
    pub async fn check(&self, key: &str) -> AuthResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let burst = f64::from(self.config.burst);
        let interval = self.config.replenish_interval.as_secs_f64();
        let now = Instant::now();

        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(key.to_string()).or_insert(TokenBucket {
            tokens: burst,
            refilled_at: now,
            last_seen: now,
        });

        if interval > 0.0 {
            let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed / interval).min(burst);
        } else {
            bucket.tokens = burst;
        }
        bucket.refilled_at = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let wait = Duration::from_secs_f64((1.0 - bucket.tokens) * interval);
        tracing::debug!(key, retry_after_ms = wait.as_millis() as u64, "rate limit exceeded");
        Err(AuthError::rate_limited(wait))
    }

    /// Drop buckets idle for longer than the configured eviction period.
    /// Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let idle = self.config.idle_eviction;
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) < idle);
        before - buckets.len()
    }

    /// Spawn the periodic cleanup task
    pub fn spawn_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        let period = self.config.idle_eviction.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = limiter.cleanup().await;
                if removed > 0 {
                    tracing::debug!(removed, "evicted idle rate-limit buckets");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_reject() {
        let limiter = test_limiter();

        for _ in 0..5 {
            assert!(limiter.check("203.0.113.7").await.is_ok());
        }

        let result = limiter.check("203.0.113.7").await;
        assert!(matches!(result, Err(AuthError::RateLimitExceeded { retry_after: 12 })));

        // Different client is unaffected
        assert!(limiter.check("203.0.113.8").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replenishes_one_token_per_interval() {
        let limiter = test_limiter();
        for _ in 0..5 {
            limiter.check("ip").await.unwrap();
        }

        tokio::time::advance(Duration::from_secs(6)).await;
        let result = limiter.check("ip").await;
        assert!(matches!(result, Err(AuthError::RateLimitExceeded { retry_after: 6 })));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.check("ip").await.is_ok());
        assert!(limiter.check("ip").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_never_exceeds_burst() {
        let limiter = test_limiter();
        limiter.check("ip").await.unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..5 {
            limiter.check("ip").await.unwrap();
        }
        assert!(limiter.check("ip").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_idle_buckets() {
        let limiter = test_limiter();
        limiter.check("old").await.unwrap();

        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        limiter.check("fresh").await.unwrap();
        tokio::time::advance(Duration::from_secs(2 * 60)).await;

        assert_eq!(limiter.cleanup().await, 1);
        let buckets = limiter.buckets.read().await;
        assert!(!buckets.contains_key("old"));
        assert!(buckets.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_disabled_rate_limiting() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        for _ in 0..100 {
            assert!(limiter.check("ip").await.is_ok());
        }
    }
}
