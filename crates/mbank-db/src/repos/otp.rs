//! OTP ledger repository

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::OtpStore;
use crate::{DbOtp, DbResult, NewOtp, OtpDispatchUpdate};

pub struct OtpRepo {
    pool: PgPool,
}

impl OtpRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OtpStore for OtpRepo {
    async fn insert(&self, otp: NewOtp) -> DbResult<DbOtp> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, DbOtp>(
            r#"
            INSERT INTO otps (otp, purpose, method, destination, user_id, user_uuid, verify_key, session_id, status, expired_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, '', $8, $9)
            RETURNING *
            "#
        )
        .bind(&otp.otp)
        .bind(&otp.purpose)
        .bind(&otp.method)
        .bind(&otp.destination)
        .bind(otp.user_id)
        .bind(otp.user_uuid)
        .bind(&otp.verify_key)
        .bind(&otp.status)
        .bind(otp.expired_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn record_dispatch(&self, id: Uuid, update: OtpDispatchUpdate) -> DbResult<DbOtp> {
        let row = sqlx::query_as::<_, DbOtp>(
            "UPDATE otps SET otp = $2, session_id = $3, status = $4 WHERE id = $1 RETURNING *"
        )
        .bind(id)
        .bind(&update.otp)
        .bind(&update.session_id)
        .bind(&update.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_latest_by_verify_key(&self, verify_key: &str) -> DbResult<Option<DbOtp>> {
        let row = sqlx::query_as::<_, DbOtp>(
            "SELECT * FROM otps WHERE verify_key = $1 ORDER BY created_at DESC LIMIT 1"
        )
        .bind(verify_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<DbOtp>> {
        let row = sqlx::query_as::<_, DbOtp>("SELECT * FROM otps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_by_session_id(&self, session_id: &str) -> DbResult<Option<DbOtp>> {
        let row = sqlx::query_as::<_, DbOtp>(
            "SELECT * FROM otps WHERE session_id = $1 ORDER BY created_at DESC LIMIT 1"
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_status(&self, id: Uuid, status: &str) -> DbResult<DbOtp> {
        let row = sqlx::query_as::<_, DbOtp>(
            "UPDATE otps SET status = $2 WHERE id = $1 RETURNING *"
        )
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_status_once(&self, id: Uuid, from: &str, to: &str) -> DbResult<Option<DbOtp>> {
        let row = sqlx::query_as::<_, DbOtp>(
            "UPDATE otps SET status = $2 WHERE id = $1 AND status = $3 RETURNING *"
        )
        .bind(id)
        .bind(to)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
