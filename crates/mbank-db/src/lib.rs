//! mbank Database Layer
//!
//! Persistence for the authenticated-request pipeline and OTP lifecycle.
//!
//! # Architecture
//!
//! - **PostgreSQL**: durable ledgers (`otps`, `access_states`, `token_blacklists`)
//! - **Redis**: transient state (nonce markers, OTP cache copies, revoked
//!   access tokens, access-grant subjects)
//!
//! # Store Traits
//!
//! The auth core depends only on the traits in [`store`]. [`Database::stores`]
//! hands out the PostgreSQL/Redis implementations; the `mock` feature adds
//! in-memory ones for tests.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod repos;
pub mod store;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::sync::Arc;

use deadpool_redis::{Config as RedisConfig, Pool as RedisPool, Runtime};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use cache::RedisCache;
pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use models::*;
pub use repos::*;
pub use store::{
    AccessGrantStore, CacheStore, GrantConsumption, OtpStore, RevokedTokenStore,
};

/// Database connection pools
pub struct Database {
    /// PostgreSQL connection pool
    pub pg: PgPool,
    /// Redis connection pool
    pub redis: RedisPool,
}

/// Shared handles to every store the auth core needs
#[derive(Clone)]
pub struct Stores {
    pub cache: Arc<dyn CacheStore>,
    pub otps: Arc<dyn OtpStore>,
    pub grants: Arc<dyn AccessGrantStore>,
    pub revoked: Arc<dyn RevokedTokenStore>,
}

impl Stores {
    /// Fresh in-memory stores
    #[cfg(any(test, feature = "mock"))]
    pub fn in_memory() -> Self {
        Self {
            cache: Arc::new(mock::MemoryCache::new()),
            otps: Arc::new(mock::MemoryOtpStore::new()),
            grants: Arc::new(mock::MemoryAccessGrantStore::new()),
            revoked: Arc::new(mock::MemoryRevokedTokenStore::new()),
        }
    }
}

impl Database {
    /// Connect to PostgreSQL and Redis
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        info!("Connecting to Redis: {}", config.redis_url_masked());

        let redis = RedisConfig::from_url(&config.redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| DbError::Connection(format!("Redis: {}", e)))?;

        let mut conn = redis
            .get()
            .await
            .map_err(|e| DbError::Connection(format!("Redis pool: {}", e)))?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DbError::Connection(format!("Redis ping: {}", e)))?;

        info!("Connected to Redis");

        Ok(Self { pg, redis })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Health check for both backends
    pub async fn health_check(&self) -> HealthStatus {
        let pg_ok = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();

        let redis_ok = async {
            let mut conn = self.redis.get().await.ok()?;
            let result: Result<String, _> = deadpool_redis::redis::cmd("PING")
                .query_async(&mut conn)
                .await;
            result.ok()
        }
        .await
        .is_some();

        HealthStatus {
            postgres: pg_ok,
            redis: redis_ok,
            healthy: pg_ok && redis_ok,
        }
    }

    pub fn otp_repo(&self) -> OtpRepo {
        OtpRepo::new(self.pg.clone())
    }

    pub fn access_grant_repo(&self) -> AccessGrantRepo {
        AccessGrantRepo::new(self.pg.clone())
    }

    pub fn revoked_token_repo(&self) -> RevokedTokenRepo {
        RevokedTokenRepo::new(self.pg.clone())
    }

    pub fn cache(&self) -> RedisCache {
        RedisCache::new(self.redis.clone())
    }

    /// Bundle the PostgreSQL and Redis implementations as trait objects
    pub fn stores(&self) -> Stores {
        Stores {
            cache: Arc::new(self.cache()),
            otps: Arc::new(self.otp_repo()),
            grants: Arc::new(self.access_grant_repo()),
            revoked: Arc::new(self.revoked_token_repo()),
        }
    }
}

/// Health status of database connections
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub postgres: bool,
    pub redis: bool,
    pub healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_stores_share_nothing() {
        let a = Stores::in_memory();
        let b = Stores::in_memory();

        a.cache
            .set("shared", "1", std::time::Duration::from_secs(10))
            .await
            .unwrap();
        assert!(a.cache.exists("shared").await.unwrap());
        assert!(!b.cache.exists("shared").await.unwrap());
    }
}
