//! Storage interfaces
//!
//! The auth core only ever talks to these traits. PostgreSQL and Redis
//! implementations live in [`crate::repos`] and [`crate::cache`]; in-memory
//! versions for tests live in [`crate::mock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    DbAccessGrant, DbOtp, DbRevokedToken, NewAccessGrant, NewOtp, NewRevokedToken,
    OtpDispatchUpdate,
};
use crate::DbResult;

/// Transient key/value cache with TTL support.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()>;

    /// Atomically store `value` only if `key` is absent. Returns `true` when
    /// this call created the key.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> DbResult<bool>;

    /// Read and delete in one step.
    async fn take(&self, key: &str) -> DbResult<Option<String>>;

    async fn delete(&self, key: &str) -> DbResult<bool>;

    async fn exists(&self, key: &str) -> DbResult<bool>;
}

impl dyn CacheStore {
    /// Store a JSON value with expiration
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> DbResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }

    /// Read-and-delete a JSON value
    pub async fn take_json<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        match self.take(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Durable OTP ledger (`otps` table).
#[async_trait]
pub trait OtpStore: Send + Sync {
    async fn insert(&self, otp: NewOtp) -> DbResult<DbOtp>;

    /// Persist the delivered code, provider session id and resulting status.
    async fn record_dispatch(&self, id: Uuid, update: OtpDispatchUpdate) -> DbResult<DbOtp>;

    /// Latest record for a verify key, expired or not.
    async fn find_latest_by_verify_key(&self, verify_key: &str) -> DbResult<Option<DbOtp>>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbOtp>>;

    async fn find_by_session_id(&self, session_id: &str) -> DbResult<Option<DbOtp>>;

    async fn set_status(&self, id: Uuid, status: &str) -> DbResult<DbOtp>;

    /// Move the row from `from` to `to`. Returns `None` when the row no
    /// longer carries `from` because another writer got there first.
    async fn mark_status_once(&self, id: Uuid, from: &str, to: &str) -> DbResult<Option<DbOtp>>;
}

/// Result of trying to consume a single-use access grant
#[derive(Debug, Clone, PartialEq)]
pub enum GrantConsumption {
    Consumed(DbAccessGrant),
    AlreadyUsed,
    Expired,
    NotFound,
}

/// Durable single-use access grants (`access_states` table).
#[async_trait]
pub trait AccessGrantStore: Send + Sync {
    async fn insert(&self, grant: NewAccessGrant) -> DbResult<DbAccessGrant>;

    async fn find_by_token(&self, access_token: &str) -> DbResult<Option<DbAccessGrant>>;

    /// Flip `used` to true if the grant exists, matches `access_type`, is
    /// unused and unexpired at `now`.
    async fn consume(
        &self,
        access_token: &str,
        access_type: &str,
        now: DateTime<Utc>,
    ) -> DbResult<GrantConsumption>;
}

/// Durable token revocation ledger (`token_blacklists` table).
#[async_trait]
pub trait RevokedTokenStore: Send + Sync {
    async fn insert(&self, entry: NewRevokedToken) -> DbResult<DbRevokedToken>;

    /// True while an entry for `token` exists with `expired_at > now`.
    async fn is_revoked(&self, token: &str, now: DateTime<Utc>) -> DbResult<bool>;

    /// Delete entries whose `expired_at` has passed. Returns rows removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64>;
}
