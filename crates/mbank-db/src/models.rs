//! Database models - mapped from PostgreSQL tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// OTP Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DbOtp {
    pub id: Uuid,
    pub otp: String,
    pub purpose: String,
    pub method: String,
    pub destination: String,
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub verify_key: String,
    pub session_id: String,
    pub status: String,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a freshly requested OTP
#[derive(Debug, Clone)]
pub struct NewOtp {
    pub otp: String,
    pub purpose: String,
    pub method: String,
    pub destination: String,
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub verify_key: String,
    pub status: String,
    pub expired_at: DateTime<Utc>,
}

/// Outcome of handing the code to a delivery channel
#[derive(Debug, Clone)]
pub struct OtpDispatchUpdate {
    pub otp: String,
    pub session_id: String,
    pub status: String,
}

// ============================================================================
// Access Grant Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DbAccessGrant {
    pub id: Uuid,
    pub access_type: String,
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub device_id: String,
    pub access_token: String,
    pub expired_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccessGrant {
    pub access_type: String,
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub device_id: String,
    pub access_token: String,
    pub expired_at: DateTime<Utc>,
}

// ============================================================================
// Token Blacklist Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DbRevokedToken {
    pub id: Uuid,
    pub token: String,
    pub blacklist_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewRevokedToken {
    pub token: String,
    pub blacklist_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub description: String,
}
