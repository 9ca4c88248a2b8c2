//! Redis-backed transient cache for nonces, OTP copies, revoked access
//! tokens and access-grant subjects

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Pool as RedisPool};
use std::time::Duration;

use crate::store::CacheStore;
use crate::{DbError, DbResult};

/// Cache key layouts
pub mod keys {
    /// Anti-replay marker for a request nonce
    pub fn nonce(nonce: &str) -> String {
        format!("{}:xsession", nonce)
    }

    /// Cache copy of an OTP record, scoped to its verify key
    pub fn otp(verify_key: &str, code: &str) -> String {
        format!("{}:{}", verify_key, code)
    }

    /// Revoked access token marker
    pub fn revoked_access(token: &str) -> String {
        format!("blacklist:{}", token)
    }
}

/// Marker value for nonce and revocation entries
pub const ACTIVE: &str = "active";

/// Redis implementation of [`CacheStore`]
#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

impl RedisCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

/// Redis rejects `EX 0`; anything shorter than a second still gets one.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let mut conn = self.pool.get().await?;

        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        let mut conn = self.pool.get().await?;

        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> DbResult<bool> {
        let mut conn = self.pool.get().await?;

        let result: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        Ok(result.is_some())
    }

    async fn take(&self, key: &str) -> DbResult<Option<String>> {
        let mut conn = self.pool.get().await?;

        let value: Option<String> = deadpool_redis::redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        Ok(value)
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        let mut conn = self.pool.get().await?;

        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        let mut conn = self.pool.get().await?;

        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        Ok(exists)
    }
}
