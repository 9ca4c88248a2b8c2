//! Single-use access grants
//!
//! Issued after a successful step-up verification. Each grant authorizes one
//! privileged follow-up action and flips to `used` atomically on
//! consumption.

use chrono::Utc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use mbank_db::{DbAccessGrant, GrantConsumption, NewAccessGrant, Stores};

use crate::config::AppConfig;
use crate::deadline;
use crate::error::{AuthError, AuthResult};
use crate::types::{AccessGrant, AccessType, Subject};

impl TryFrom<DbAccessGrant> for AccessGrant {
    type Error = AuthError;

    fn try_from(row: DbAccessGrant) -> AuthResult<Self> {
        Ok(Self {
            id: row.id,
            access_type: row.access_type.parse()?,
            user_id: row.user_id,
            user_uuid: row.user_uuid,
            device_id: row.device_id,
            access_token: row.access_token,
            expires_at: row.expired_at,
            used: row.used,
        })
    }
}

/// Issues and consumes access grants
pub struct AccessGrantService {
    stores: Stores,
    lifetime: Duration,
    timeout: Duration,
}

impl AccessGrantService {
    pub fn new(stores: &Stores, config: &AppConfig) -> Self {
        Self {
            stores: stores.clone(),
            lifetime: config.access_key_expire,
            timeout: config.context_timeout,
        }
    }

    /// Issue a grant for `access_type`, valid for `access_key_expire`
    pub async fn issue(
        &self,
        access_type: AccessType,
        subject: &Subject,
        device_id: &str,
    ) -> AuthResult<AccessGrant> {
        let access_token = Uuid::new_v4().to_string();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.lifetime).map_err(|e| AuthError::Config(e.to_string()))?;

        let row = deadline::store(
            self.timeout,
            "access_states.insert",
            self.stores.grants.insert(NewAccessGrant {
                access_type: access_type.as_str().to_string(),
                user_id: subject.id,
                user_uuid: subject.uuid,
                device_id: device_id.to_string(),
                access_token: access_token.clone(),
                expired_at: expires_at,
            }),
        )
        .await?;

        info!(access_type = %access_type, user_uuid = %subject.uuid, "access grant issued");
        AccessGrant::try_from(row)
    }

    /// Consume a grant exactly once
    pub async fn consume(&self, access_token: &str, access_type: AccessType) -> AuthResult<AccessGrant> {
        let outcome = deadline::store(
            self.timeout,
            "access_states.consume",
            self.stores
                .grants
                .consume(access_token, access_type.as_str(), Utc::now()),
        )
        .await?;

        match outcome {
            GrantConsumption::Consumed(row) => {
                info!(access_type = %access_type, user_uuid = %row.user_uuid, "access grant consumed");
                AccessGrant::try_from(row)
            }
            GrantConsumption::AlreadyUsed => Err(AuthError::GrantUsed),
            GrantConsumption::Expired => Err(AuthError::GrantExpired),
            GrantConsumption::NotFound => Err(AuthError::NotFound("access grant".to_string())),
        }
    }
}
