//! Token blacklist repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::store::RevokedTokenStore;
use crate::{DbResult, DbRevokedToken, NewRevokedToken};

pub struct RevokedTokenRepo {
    pool: PgPool,
}

impl RevokedTokenRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevokedTokenStore for RevokedTokenRepo {
    async fn insert(&self, entry: NewRevokedToken) -> DbResult<DbRevokedToken> {
        let row = sqlx::query_as::<_, DbRevokedToken>(
            r#"
            INSERT INTO token_blacklists (token, blacklist_at, expired_at, description)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#
        )
        .bind(&entry.token)
        .bind(entry.blacklist_at)
        .bind(entry.expired_at)
        .bind(&entry.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn is_revoked(&self, token: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let found: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM token_blacklists WHERE token = $1 AND expired_at > $2 LIMIT 1"
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM token_blacklists WHERE expired_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
