//! Access grant repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::DbError;
use crate::store::{AccessGrantStore, GrantConsumption};
use crate::{DbAccessGrant, DbResult, NewAccessGrant};

pub struct AccessGrantRepo {
    pool: PgPool,
}

impl AccessGrantRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessGrantStore for AccessGrantRepo {
    async fn insert(&self, grant: NewAccessGrant) -> DbResult<DbAccessGrant> {
        let row = sqlx::query_as::<_, DbAccessGrant>(
            r#"
            INSERT INTO access_states (access_type, user_id, user_uuid, device_id, access_token, expired_at, used)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE)
            RETURNING *
            "#
        )
        .bind(&grant.access_type)
        .bind(grant.user_id)
        .bind(grant.user_uuid)
        .bind(&grant.device_id)
        .bind(&grant.access_token)
        .bind(grant.expired_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DbError::Duplicate("access token already issued".to_string())
            }
            other => DbError::Query(other),
        })?;
        Ok(row)
    }

    async fn find_by_token(&self, access_token: &str) -> DbResult<Option<DbAccessGrant>> {
        let row = sqlx::query_as::<_, DbAccessGrant>(
            "SELECT * FROM access_states WHERE access_token = $1"
        )
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn consume(
        &self,
        access_token: &str,
        access_type: &str,
        now: DateTime<Utc>,
    ) -> DbResult<GrantConsumption> {
        let consumed = sqlx::query_as::<_, DbAccessGrant>(
            r#"
            UPDATE access_states SET used = TRUE
            WHERE access_token = $1 AND access_type = $2 AND used = FALSE AND expired_at > $3
            RETURNING *
            "#
        )
        .bind(access_token)
        .bind(access_type)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(grant) = consumed {
            return Ok(GrantConsumption::Consumed(grant));
        }

        // Nothing updated; work out why for the caller
        let outcome = match self.find_by_token(access_token).await? {
            Some(grant) if grant.access_type != access_type => GrantConsumption::NotFound,
            Some(grant) if grant.used => GrantConsumption::AlreadyUsed,
            Some(_) => GrantConsumption::Expired,
            None => GrantConsumption::NotFound,
        };
        Ok(outcome)
    }
}
