//! mbank Authentication Core
//!
//! Request authentication and step-up verification for the mbank mobile
//! banking API:
//!
//! - **Request Authenticator**: mandatory headers, body signature and bearer
//!   token checked concurrently, with per-path exemptions and an access log
//! - **Token Service**: RS512 access/refresh pairs on separate key pairs,
//!   revocation cache plus durable ledger
//! - **Nonce Guard**: single-use request nonces within a TTL window
//! - **OTP Manager**: email, SMS and WhatsApp one-time passcodes
//! - **Access Grants**: single-use authorizations issued after an OTP
//! - **Rate Limiting**: injected per-client token bucket
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Request → RateLimiter → AuthLayer → Handler                 │
//! │                              │                               │
//! │              ┌───────────────┼───────────────┐               │
//! │              ▼               ▼               ▼               │
//! │      Mandatory headers   Signature     TokenService          │
//! │              └───────────────┼───────────────┘               │
//! │                              ▼                               │
//! │              RequestContext (+ AuthenticatedSubject)         │
//! │                                                              │
//! │  AuthService: request_otp → verify_otp → AccessGrant         │
//! │               refresh · logout · consume_grant               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod access_grant;
pub mod authenticator;
pub mod channel;
pub mod config;
pub mod context;
mod deadline;
pub mod error;
pub mod headers;
pub mod middleware;
pub mod nonce;
pub mod otp;
pub mod rate_limit;
pub mod signature;
pub mod token;
pub mod types;

pub use access_grant::AccessGrantService;
pub use authenticator::{RejectionKind, RequestAuthenticator};
pub use channel::{ChannelAdapter, ChannelSet, IdentityVerifier, Mailer};
pub use config::AuthConfig;
pub use context::RequestContext;
pub use error::{AuthError, AuthResult, ErrorKind, ErrorResponse};
pub use middleware::{AuthLayer, AuthMiddleware, Ctx, RequireSubject};
pub use nonce::NonceGuard;
pub use otp::{OtpIssued, OtpManager, OtpRecord, OtpStatus};
pub use rate_limit::RateLimiter;
pub use token::TokenService;
pub use types::*;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use mbank_db::Stores;

use channel::{EmailChannel, SmsChannel, VerihubsClient, WhatsAppChannel};

/// Account-level flows composed from the core components
#[derive(Clone)]
pub struct AuthService {
    pub tokens: Arc<TokenService>,
    pub otp: Arc<OtpManager>,
    pub grants: Arc<AccessGrantService>,
    pub authenticator: Arc<RequestAuthenticator>,
    pub rate_limiter: RateLimiter,
    config: AuthConfig,
}

impl AuthService {
    /// Wire every component against `stores`
    pub fn new(
        config: AuthConfig,
        stores: Stores,
        channels: ChannelSet,
        verifier: Option<Arc<dyn IdentityVerifier>>,
    ) -> AuthResult<Self> {
        let timeout = config.app.context_timeout;
        let tokens = Arc::new(TokenService::new(config.jwt.clone(), &stores, timeout)?);
        let nonce = NonceGuard::new(stores.cache.clone(), config.app.xsession_expire, timeout);
        let authenticator = Arc::new(RequestAuthenticator::new(tokens.clone(), nonce, &config.guard));
        let otp = Arc::new(OtpManager::new(&stores, channels, verifier, &config.app));
        let grants = Arc::new(AccessGrantService::new(&stores, &config.app));
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());

        Ok(Self {
            tokens,
            otp,
            grants,
            authenticator,
            rate_limiter,
            config,
        })
    }

    /// Production wiring: email through `mailer`, SMS and WhatsApp through
    /// Verihubs, which also verifies their codes.
    pub fn with_default_channels(
        config: AuthConfig,
        stores: Stores,
        mailer: Arc<dyn Mailer>,
    ) -> AuthResult<Self> {
        let verihubs = Arc::new(VerihubsClient::new(
            config.verihubs.clone(),
            config.app.context_timeout,
        )?);
        let channels = ChannelSet::new()
            .with(Arc::new(EmailChannel::new(mailer, config.email.clone())))
            .with(Arc::new(SmsChannel::new(verihubs.clone())))
            .with(Arc::new(WhatsAppChannel::new(verihubs.clone())));

        Self::new(config, stores, channels, Some(verihubs))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Create an auth layer for an Axum router
    pub fn layer(&self) -> AuthLayer {
        let layer = AuthLayer::new(self.authenticator.clone());
        if self.config.rate_limit.enabled {
            layer.with_rate_limiter(self.rate_limiter.clone())
        } else {
            layer
        }
    }

    /// Issue an OTP for `subject` over `channel`
    pub async fn request_otp(
        &self,
        ctx: &RequestContext,
        subject: &Subject,
        purpose: OtpPurpose,
        channel: OtpChannel,
        destination: &str,
    ) -> AuthResult<OtpIssued> {
        let issued = self
            .otp
            .generate(purpose, channel, destination, subject, None)
            .await?;
        info!(
            request_id = %ctx.request_id,
            verify_key = %issued.verify_key,
            status = %issued.record.status,
            "OTP requested"
        );
        Ok(issued)
    }

    /// Verify an OTP and issue the access grant its purpose unlocks
    pub async fn verify_otp(
        &self,
        ctx: &RequestContext,
        code: &str,
        verify_key: &str,
        device_id: &str,
    ) -> AuthResult<(OtpRecord, AccessGrant)> {
        let record = self.otp.verify(code, verify_key).await?;

        let known = ctx.subject.as_ref().filter(|s| s.uuid == record.user_uuid);
        let subject = Subject {
            id: record.user_id,
            uuid: record.user_uuid,
            username: known.map(|s| s.username.clone()).unwrap_or_default(),
            role: known.map(|s| s.role.clone()).unwrap_or_default(),
        };

        let grant = self
            .grants
            .issue(record.purpose.grant_type(), &subject, device_id)
            .await?;
        info!(
            request_id = %ctx.request_id,
            verify_key,
            access_type = %grant.access_type,
            "OTP verified, access grant issued"
        );
        Ok((record, grant))
    }

    /// Exchange a refresh token for a pair carrying the identity signed into
    /// it. Tokens on the revocation ledger are refused.
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
        user_uuid: uuid::Uuid,
    ) -> AuthResult<TokenPair> {
        if self.tokens.is_refresh_revoked(refresh_token).await? {
            tracing::warn!(request_id = %ctx.request_id, subject = %user_uuid, "revoked refresh token presented");
            return Err(AuthError::TokenRevoked);
        }
        self.tokens.refresh(refresh_token, user_uuid)
    }

    pub async fn logout(&self, ctx: &RequestContext, access_token: &str, refresh_token: &str) -> AuthResult<()> {
        self.tokens.revoke(access_token, refresh_token).await?;
        info!(request_id = %ctx.request_id, "logged out");
        Ok(())
    }

    pub async fn consume_grant(&self, access_token: &str, access_type: AccessType) -> AuthResult<AccessGrant> {
        self.grants.consume(access_token, access_type).await
    }

    /// Drop ledger rows whose expiry has passed
    pub async fn purge_revoked(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let removed = self.tokens.purge_revoked(now).await?;
        if removed > 0 {
            info!(removed, "purged expired revocation entries");
        }
        Ok(removed)
    }
}
