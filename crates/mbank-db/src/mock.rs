//! In-memory stores for tests and local development
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive TTLs with
//! `tokio::time::pause()` and `advance()`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::{
    DbAccessGrant, DbOtp, DbRevokedToken, NewAccessGrant, NewOtp, NewRevokedToken,
    OtpDispatchUpdate,
};
use crate::store::{AccessGrantStore, CacheStore, GrantConsumption, OtpStore, RevokedTokenStore};
use crate::{DbError, DbResult};

// ============================================================================
// Cache
// ============================================================================

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().1 > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> DbResult<bool> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| (String::new(), now));
        if entry.1 > now {
            return Ok(false);
        }
        *entry = (value.to_string(), now + ttl);
        Ok(true)
    }

    async fn take(&self, key: &str) -> DbResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .and_then(|(_, (value, expires))| (expires > now).then_some(value)))
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        Ok(self.take(key).await?.is_some())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        Ok(self.live(key).is_some())
    }
}

// ============================================================================
// OTP ledger
// ============================================================================

#[derive(Default)]
pub struct MemoryOtpStore {
    rows: RwLock<Vec<DbOtp>>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row, oldest first
    pub fn all(&self) -> Vec<DbOtp> {
        self.rows.read().clone()
    }

    /// Overwrite a row's expiry, for exercising expiry paths
    pub fn set_expiry(&self, id: Uuid, expired_at: DateTime<Utc>) {
        if let Some(row) = self.rows.write().iter_mut().find(|r| r.id == id) {
            row.expired_at = expired_at;
        }
    }

    fn update<F: FnOnce(&mut DbOtp)>(&self, id: Uuid, f: F) -> DbResult<DbOtp> {
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DbError::NotFound(format!("otp {}", id)))?;
        f(row);
        Ok(row.clone())
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn insert(&self, otp: NewOtp) -> DbResult<DbOtp> {
        let row = DbOtp {
            id: Uuid::new_v4(),
            otp: otp.otp,
            purpose: otp.purpose,
            method: otp.method,
            destination: otp.destination,
            user_id: otp.user_id,
            user_uuid: otp.user_uuid,
            verify_key: otp.verify_key,
            session_id: String::new(),
            status: otp.status,
            expired_at: otp.expired_at,
            created_at: Utc::now(),
        };
        self.rows.write().push(row.clone());
        Ok(row)
    }

    async fn record_dispatch(&self, id: Uuid, update: OtpDispatchUpdate) -> DbResult<DbOtp> {
        self.update(id, |row| {
            row.otp = update.otp;
            row.session_id = update.session_id;
            row.status = update.status;
        })
    }

    async fn find_latest_by_verify_key(&self, verify_key: &str) -> DbResult<Option<DbOtp>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.verify_key == verify_key)
            .last()
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbOtp>> {
        Ok(self.rows.read().iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_session_id(&self, session_id: &str) -> DbResult<Option<DbOtp>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.session_id == session_id)
            .last()
            .cloned())
    }

    async fn set_status(&self, id: Uuid, status: &str) -> DbResult<DbOtp> {
        self.update(id, |row| row.status = status.to_string())
    }

    async fn mark_status_once(&self, id: Uuid, from: &str, to: &str) -> DbResult<Option<DbOtp>> {
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DbError::NotFound(format!("otp {}", id)))?;
        if row.status != from {
            return Ok(None);
        }
        row.status = to.to_string();
        Ok(Some(row.clone()))
    }
}

// ============================================================================
// Access grants
// ============================================================================

#[derive(Default)]
pub struct MemoryAccessGrantStore {
    rows: DashMap<String, DbAccessGrant>,
}

impl MemoryAccessGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessGrantStore for MemoryAccessGrantStore {
    async fn insert(&self, grant: NewAccessGrant) -> DbResult<DbAccessGrant> {
        if self.rows.contains_key(&grant.access_token) {
            return Err(DbError::Duplicate("access token already issued".to_string()));
        }
        let row = DbAccessGrant {
            id: Uuid::new_v4(),
            access_type: grant.access_type,
            user_id: grant.user_id,
            user_uuid: grant.user_uuid,
            device_id: grant.device_id,
            access_token: grant.access_token,
            expired_at: grant.expired_at,
            used: false,
            created_at: Utc::now(),
        };
        self.rows.insert(row.access_token.clone(), row.clone());
        Ok(row)
    }

    async fn find_by_token(&self, access_token: &str) -> DbResult<Option<DbAccessGrant>> {
        Ok(self.rows.get(access_token).map(|r| r.clone()))
    }

    async fn consume(
        &self,
        access_token: &str,
        access_type: &str,
        now: DateTime<Utc>,
    ) -> DbResult<GrantConsumption> {
        let Some(mut grant) = self.rows.get_mut(access_token) else {
            return Ok(GrantConsumption::NotFound);
        };
        let outcome = if grant.access_type != access_type {
            GrantConsumption::NotFound
        } else if grant.used {
            GrantConsumption::AlreadyUsed
        } else if grant.expired_at <= now {
            GrantConsumption::Expired
        } else {
            grant.used = true;
            GrantConsumption::Consumed(grant.clone())
        };
        Ok(outcome)
    }
}

// ============================================================================
// Revocation ledger
// ============================================================================

#[derive(Default)]
pub struct MemoryRevokedTokenStore {
    rows: RwLock<Vec<DbRevokedToken>>,
}

impl MemoryRevokedTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DbRevokedToken> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl RevokedTokenStore for MemoryRevokedTokenStore {
    async fn insert(&self, entry: NewRevokedToken) -> DbResult<DbRevokedToken> {
        let row = DbRevokedToken {
            id: Uuid::new_v4(),
            token: entry.token,
            blacklist_at: entry.blacklist_at,
            expired_at: entry.expired_at,
            description: entry.description,
        };
        self.rows.write().push(row.clone());
        Ok(row)
    }

    async fn is_revoked(&self, token: &str, now: DateTime<Utc>) -> DbResult<bool> {
        Ok(self
            .rows
            .read()
            .iter()
            .any(|r| r.token == token && r.expired_at > now))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|r| r.expired_at > now);
        Ok((before - rows.len()) as u64)
    }
}
