//! OTP Manager
//!
//! Draws, persists, dispatches and verifies one-time passcodes.
//!
//! # Flow
//!
//! 1. [`OtpManager::generate`] reserves a fresh code under the verify key
//!    with an atomic set-if-absent, inserts a `Requested` record, hands it to
//!    the channel adapter and records `Delivered` or `Failed`.
//! 2. A copy of the dispatched record is cached under `{verify_key}:{code}`
//!    for `otp_expire`.
//! 3. [`OtpManager::verify`] consumes that cache copy (read-and-delete) or
//!    falls back to the ledger, checks the record, asks the provider for
//!    SMS/WhatsApp, and flips the status to `Verified` exactly once.

pub mod state;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mbank_db::cache::{keys, ACTIVE};
use mbank_db::{DbOtp, NewOtp, OtpDispatchUpdate, Stores};

use crate::channel::{ChannelSet, DispatchRequest, IdentityVerifier};
use crate::config::AppConfig;
use crate::deadline;
use crate::error::{AuthError, AuthResult};
use crate::types::{OtpChannel, OtpPurpose, Subject};

pub use state::OtpStatus;

const CODE_DIGITS: &[u8; 10] = b"1234567890";

/// Typed view of a persisted OTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub id: Uuid,
    pub code: String,
    pub purpose: OtpPurpose,
    pub channel: OtpChannel,
    pub destination: String,
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub verify_key: String,
    pub session_id: String,
    pub status: OtpStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl OtpRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl TryFrom<DbOtp> for OtpRecord {
    type Error = AuthError;

    fn try_from(row: DbOtp) -> AuthResult<Self> {
        Ok(Self {
            id: row.id,
            code: row.otp,
            purpose: row.purpose.parse()?,
            channel: row.method.parse()?,
            destination: row.destination,
            user_id: row.user_id,
            user_uuid: row.user_uuid,
            verify_key: row.verify_key,
            session_id: row.session_id,
            status: row.status.parse()?,
            expires_at: row.expired_at,
            created_at: row.created_at,
        })
    }
}

/// Result of [`OtpManager::generate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpIssued {
    pub record: OtpRecord,
    pub verify_key: String,
    pub expires_at: DateTime<Utc>,
}

/// OTP lifecycle manager
pub struct OtpManager {
    stores: Stores,
    channels: ChannelSet,
    verifier: Option<Arc<dyn IdentityVerifier>>,
    otp_expire: Duration,
    otp_length: usize,
    attempts: u32,
    timeout: Duration,
}

impl OtpManager {
    pub fn new(
        stores: &Stores,
        channels: ChannelSet,
        verifier: Option<Arc<dyn IdentityVerifier>>,
        config: &AppConfig,
    ) -> Self {
        Self {
            stores: stores.clone(),
            channels,
            verifier,
            otp_expire: config.otp_expire,
            otp_length: config.otp_length,
            attempts: config.otp_generate_attempts,
            timeout: config.context_timeout,
        }
    }

    /// Create and dispatch an OTP.
    ///
    /// A failed dispatch is recorded as `Failed` and the record is still
    /// returned; callers inspect `record.status` to prompt a retry.
    pub async fn generate(
        &self,
        purpose: OtpPurpose,
        channel: OtpChannel,
        destination: &str,
        subject: &Subject,
        verify_key: Option<String>,
    ) -> AuthResult<OtpIssued> {
        let adapter = self.channels.get(channel)?.clone();
        let verify_key = verify_key.unwrap_or_else(|| Uuid::new_v4().to_string());

        let code = if adapter.generates_code() {
            None
        } else {
            Some(self.reserve_code(&verify_key).await?)
        };

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.otp_expire).map_err(|e| AuthError::Config(e.to_string()))?;

        let row = deadline::store(
            self.timeout,
            "otps.insert",
            self.stores.otps.insert(NewOtp {
                otp: code.clone().unwrap_or_default(),
                purpose: purpose.as_str().to_string(),
                method: channel.as_str().to_string(),
                destination: destination.to_string(),
                user_id: subject.id,
                user_uuid: subject.uuid,
                verify_key: verify_key.clone(),
                status: OtpStatus::Requested.as_str().to_string(),
                expired_at: expires_at,
            }),
        )
        .await?;

        let request = DispatchRequest {
            destination: destination.to_string(),
            code,
            time_limit: self.otp_expire,
            verify_key: verify_key.clone(),
        };

        let row = match deadline::upstream(self.timeout, "otp.dispatch", adapter.send(&request)).await {
            Ok(dispatched) => {
                deadline::store(
                    self.timeout,
                    "otps.record_dispatch",
                    self.stores.otps.record_dispatch(
                        row.id,
                        OtpDispatchUpdate {
                            otp: dispatched.delivered_code,
                            session_id: dispatched.session_id,
                            status: OtpStatus::Delivered.as_str().to_string(),
                        },
                    ),
                )
                .await?
            }
            Err(e) => {
                warn!(
                    verify_key = %verify_key,
                    channel = %channel,
                    error = %e,
                    "OTP dispatch failed"
                );
                deadline::store(
                    self.timeout,
                    "otps.set_status",
                    self.stores.otps.set_status(row.id, OtpStatus::Failed.as_str()),
                )
                .await?
            }
        };

        if !row.otp.is_empty() {
            self.cache_copy(&row).await;
        }

        let record = OtpRecord::try_from(row)?;
        info!(
            verify_key = %verify_key,
            purpose = %purpose,
            channel = %channel,
            status = %record.status,
            "OTP generated"
        );

        Ok(OtpIssued {
            record,
            verify_key,
            expires_at,
        })
    }

    /// Verify `code` against the OTP issued under `verify_key`
    pub async fn verify(&self, code: &str, verify_key: &str) -> AuthResult<OtpRecord> {
        if code.is_empty() {
            return Err(AuthError::InvalidOtp);
        }

        let row = match self.take_cache_copy(verify_key, code).await {
            Some(row) => row,
            None => deadline::store(
                self.timeout,
                "otps.find_latest",
                self.stores.otps.find_latest_by_verify_key(verify_key),
            )
            .await?
            .ok_or(AuthError::InvalidOtp)?,
        };
        let record = OtpRecord::try_from(row)?;

        if !bool::from(record.code.as_bytes().ct_eq(code.as_bytes())) {
            debug!(verify_key, "OTP code mismatch");
            return Err(AuthError::InvalidOtp);
        }

        if record.status == OtpStatus::Blocked {
            return Err(AuthError::OtpBlocked);
        }

        if record.is_expired_at(Utc::now()) {
            if record.status.can_transition_to(OtpStatus::Expired) {
                let persisted = deadline::store(
                    self.timeout,
                    "otps.set_status",
                    self.stores.otps.set_status(record.id, OtpStatus::Expired.as_str()),
                )
                .await;
                if let Err(e) = persisted {
                    warn!(verify_key, error = %e, "could not persist OTP expiry");
                }
            }
            return Err(AuthError::OtpExpired);
        }

        if record.status == OtpStatus::Verified {
            return Err(AuthError::OtpAlreadyVerified);
        }

        if record.status.is_terminal() {
            return Err(AuthError::OtpNotVerifiable(record.status.to_string()));
        }

        if record.channel != OtpChannel::Email {
            let verifier = self.verifier.as_ref().ok_or_else(|| {
                AuthError::Config(format!("no identity verifier for {}", record.channel))
            })?;
            deadline::upstream(
                self.timeout,
                "otp.provider_verify",
                verifier.verify(record.channel, &record.destination, &record.code),
            )
            .await?;
        }

        let updated = self.mark_verified(&record).await?;

        info!(verify_key, channel = %record.channel, "OTP verified");
        OtpRecord::try_from(updated)
    }

    /// Move `record` to `Verified` only from the status it was checked in.
    /// When another writer moved the row first, the outcome follows the
    /// status it moved it to.
    async fn mark_verified(&self, record: &OtpRecord) -> AuthResult<DbOtp> {
        let mut from = record.status;
        for _ in 0..2 {
            let marked = deadline::store(
                self.timeout,
                "otps.mark_verified",
                self.stores
                    .otps
                    .mark_status_once(record.id, from.as_str(), OtpStatus::Verified.as_str()),
            )
            .await?;
            if let Some(row) = marked {
                return Ok(row);
            }

            let current: OtpStatus = deadline::store(
                self.timeout,
                "otps.find_by_id",
                self.stores.otps.find_by_id(record.id),
            )
            .await?
            .ok_or(AuthError::InvalidOtp)?
            .status
            .parse()?;
            warn!(verify_key = %record.verify_key, from = %from, current = %current, "OTP status changed during verify");

            match current {
                OtpStatus::Verified => return Err(AuthError::OtpAlreadyVerified),
                OtpStatus::Blocked => return Err(AuthError::OtpBlocked),
                status if status.is_terminal() => {
                    return Err(AuthError::OtpNotVerifiable(status.to_string()))
                }
                // A delivery report advanced the row past a stale cached copy
                status => from = status,
            }
        }
        Err(AuthError::OtpNotVerifiable(from.to_string()))
    }

    /// Apply a provider delivery report to the record dispatched under
    /// `session_id`. Unknown codes and illegal transitions are ignored.
    pub async fn apply_delivery_report(
        &self,
        session_id: &str,
        channel: OtpChannel,
        provider_code: i32,
    ) -> AuthResult<Option<OtpRecord>> {
        let Some(next) = OtpStatus::from_provider_code(channel, provider_code) else {
            warn!(session_id, channel = %channel, provider_code, "unknown delivery report code");
            return Ok(None);
        };

        let row = deadline::store(
            self.timeout,
            "otps.find_by_session",
            self.stores.otps.find_by_session_id(session_id),
        )
        .await?
        .ok_or_else(|| AuthError::NotFound("otp".to_string()))?;
        let record = OtpRecord::try_from(row)?;

        if record.channel != channel || !record.status.can_transition_to(next) {
            info!(
                session_id,
                from = %record.status,
                to = %next,
                "delivery report ignored"
            );
            return Ok(None);
        }

        let updated = deadline::store(
            self.timeout,
            "otps.set_status",
            self.stores.otps.set_status(record.id, next.as_str()),
        )
        .await?;

        // The cached copy would otherwise still show the old status
        let key = keys::otp(&record.verify_key, &record.code);
        if let Err(e) = deadline::store(self.timeout, "cache.delete", self.stores.cache.delete(&key)).await {
            warn!(session_id, error = %e, "could not drop cached OTP copy");
        }

        OtpRecord::try_from(updated).map(Some)
    }

    /// Reserve an unused code for `verify_key`
    async fn reserve_code(&self, verify_key: &str) -> AuthResult<String> {
        for attempt in 1..=self.attempts {
            let code = draw_code(self.otp_length);
            let key = keys::otp(verify_key, &code);
            let reserved = deadline::store(
                self.timeout,
                "cache.reserve_otp",
                self.stores.cache.set_nx(&key, ACTIVE, self.otp_expire),
            )
            .await?;
            if reserved {
                return Ok(code);
            }
            debug!(verify_key, attempt, "OTP code collision, redrawing");
        }

        Err(AuthError::Internal(format!(
            "no unique OTP code after {} attempts",
            self.attempts
        )))
    }

    async fn cache_copy(&self, row: &DbOtp) {
        let key = keys::otp(&row.verify_key, &row.otp);
        if let Err(e) = deadline::store(self.timeout, "cache.set_otp", self.stores.cache.set_json(&key, row, self.otp_expire)).await {
            warn!(verify_key = %row.verify_key, error = %e, "could not cache OTP copy");
        }
    }

    /// Consume the cached copy. Cache trouble degrades to a ledger read.
    async fn take_cache_copy(&self, verify_key: &str, code: &str) -> Option<DbOtp> {
        let key = keys::otp(verify_key, code);
        match deadline::store(self.timeout, "cache.take_otp", self.stores.cache.take_json(&key)).await {
            Ok(row) => row,
            Err(e) => {
                warn!(verify_key, error = %e, "OTP cache read failed, using ledger");
                None
            }
        }
    }
}

/// Numeric code from the OS random source
fn draw_code(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| CODE_DIGITS[usize::from(*b % 10)] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{RecordingChannel, RecordingVerifier};
    use crate::token::tests::test_subject;
    use mbank_db::mock::{MemoryAccessGrantStore, MemoryCache, MemoryOtpStore, MemoryRevokedTokenStore};
    use mbank_db::{CacheStore, OtpStore};

    struct Fixture {
        manager: OtpManager,
        otps: Arc<MemoryOtpStore>,
        cache: Arc<MemoryCache>,
        email: Arc<RecordingChannel>,
        verifier: Arc<RecordingVerifier>,
    }

    fn fixture_with(email: RecordingChannel, sms: RecordingChannel, verifier: RecordingVerifier, config: AppConfig) -> Fixture {
        let otps = Arc::new(MemoryOtpStore::new());
        let cache = Arc::new(MemoryCache::new());
        let stores = Stores {
            cache: cache.clone(),
            otps: otps.clone(),
            grants: Arc::new(MemoryAccessGrantStore::new()),
            revoked: Arc::new(MemoryRevokedTokenStore::new()),
        };
        let email = Arc::new(email);
        let verifier = Arc::new(verifier);
        let channels = ChannelSet::new().with(email.clone()).with(Arc::new(sms));
        let manager = OtpManager::new(&stores, channels, Some(verifier.clone()), &config);
        Fixture {
            manager,
            otps,
            cache,
            email,
            verifier,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            RecordingChannel::new(OtpChannel::Email),
            RecordingChannel::new(OtpChannel::Sms),
            RecordingVerifier::default(),
            AppConfig::default(),
        )
    }

    fn wrong_code(code: &str) -> String {
        code.chars()
            .map(|c| char::from_digit((c.to_digit(10).unwrap_or(0) + 1) % 10, 10).unwrap_or('0'))
            .collect()
    }

    async fn email_otp(f: &Fixture) -> OtpIssued {
        f.manager
            .generate(OtpPurpose::VerifyAccount, OtpChannel::Email, "a@b.com", &test_subject(), None)
            .await
            .unwrap()
    }

    #[test]
    fn test_draw_code_is_numeric() {
        for _ in 0..100 {
            let code = draw_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_email_scenario() {
        let f = fixture();
        let issued = email_otp(&f).await;
        assert_eq!(issued.record.status, OtpStatus::Delivered);
        assert_eq!(issued.record.session_id, issued.verify_key);
        assert_eq!(issued.record.user_id, 42);

        let code = f.email.last_code().unwrap();
        assert_eq!(code, issued.record.code);

        let err = f.manager.verify(&wrong_code(&code), &issued.verify_key).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOtp));

        let verified = f.manager.verify(&code, &issued.verify_key).await.unwrap();
        assert_eq!(verified.status, OtpStatus::Verified);

        let err = f.manager.verify(&code, &issued.verify_key).await.unwrap_err();
        assert!(matches!(err, AuthError::OtpAlreadyVerified));
        assert!(f.verifier.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cache_copy_is_single_use() {
        let f = fixture();
        let issued = email_otp(&f).await;
        let key = keys::otp(&issued.verify_key, &issued.record.code);
        assert!(f.cache.exists(&key).await.unwrap());

        f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap();
        assert!(!f.cache.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_falls_back_to_ledger() {
        let f = fixture();
        let issued = email_otp(&f).await;
        f.cache
            .delete(&keys::otp(&issued.verify_key, &issued.record.code))
            .await
            .unwrap();

        let verified = f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap();
        assert_eq!(verified.status, OtpStatus::Verified);
    }

    #[tokio::test]
    async fn test_unknown_verify_key_is_invalid() {
        let f = fixture();
        assert!(matches!(
            f.manager.verify("123456", "nope").await,
            Err(AuthError::InvalidOtp)
        ));
        assert!(matches!(f.manager.verify("", "nope").await, Err(AuthError::InvalidOtp)));
    }

    #[tokio::test]
    async fn test_expired_otp_rejected_and_persisted() {
        let f = fixture();
        let issued = email_otp(&f).await;
        f.otps.set_expiry(issued.record.id, Utc::now() - chrono::Duration::seconds(1));
        f.cache
            .delete(&keys::otp(&issued.verify_key, &issued.record.code))
            .await
            .unwrap();

        let err = f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap_err();
        assert!(matches!(err, AuthError::OtpExpired));
        assert_eq!(f.otps.all()[0].status, "Expired");
    }

    #[tokio::test]
    async fn test_dispatch_failure_still_returns_record() {
        let f = fixture_with(
            RecordingChannel {
                fail: true,
                ..RecordingChannel::new(OtpChannel::Email)
            },
            RecordingChannel::new(OtpChannel::Sms),
            RecordingVerifier::default(),
            AppConfig::default(),
        );
        let issued = email_otp(&f).await;
        assert_eq!(issued.record.status, OtpStatus::Failed);
        assert_eq!(f.otps.all()[0].status, "Failed");

        // Failed is not terminal
        let verified = f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap();
        assert_eq!(verified.status, OtpStatus::Verified);
    }

    #[tokio::test]
    async fn test_provider_generated_sms_code() {
        let f = fixture_with(
            RecordingChannel::new(OtpChannel::Email),
            RecordingChannel {
                provider_code: Some("908070".to_string()),
                ..RecordingChannel::new(OtpChannel::Sms)
            },
            RecordingVerifier::default(),
            AppConfig::default(),
        );
        let issued = f
            .manager
            .generate(OtpPurpose::ResetPin, OtpChannel::Sms, "62812", &test_subject(), None)
            .await
            .unwrap();
        assert_eq!(issued.record.code, "908070");
        assert_eq!(issued.record.session_id, format!("session-{}", issued.verify_key));

        f.manager.verify("908070", &issued.verify_key).await.unwrap();
        let calls = f.verifier.calls.lock();
        assert_eq!(calls[0], (OtpChannel::Sms, "62812".to_string(), "908070".to_string()));
    }

    #[tokio::test]
    async fn test_provider_rejection_leaves_status() {
        let f = fixture_with(
            RecordingChannel::new(OtpChannel::Email),
            RecordingChannel::new(OtpChannel::Sms),
            RecordingVerifier {
                reject: true,
                ..RecordingVerifier::default()
            },
            AppConfig::default(),
        );
        let issued = f
            .manager
            .generate(OtpPurpose::ResetPin, OtpChannel::Sms, "62812", &test_subject(), None)
            .await
            .unwrap();

        let err = f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap_err();
        assert!(matches!(err, AuthError::Upstream(_)));
        assert_eq!(f.otps.all()[0].status, "Delivered");
    }

    /// Blocks the OTP row while the provider check is in flight
    struct BlockingVerifier {
        otps: Arc<MemoryOtpStore>,
    }

    #[async_trait::async_trait]
    impl IdentityVerifier for BlockingVerifier {
        async fn verify(&self, _channel: OtpChannel, _destination: &str, _code: &str) -> AuthResult<()> {
            let id = self.otps.all()[0].id;
            self.otps.set_status(id, OtpStatus::Blocked.as_str()).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_block_during_verify_is_kept() {
        let otps = Arc::new(MemoryOtpStore::new());
        let stores = Stores {
            cache: Arc::new(MemoryCache::new()),
            otps: otps.clone(),
            grants: Arc::new(MemoryAccessGrantStore::new()),
            revoked: Arc::new(MemoryRevokedTokenStore::new()),
        };
        let channels = ChannelSet::new().with(Arc::new(RecordingChannel::new(OtpChannel::Sms)));
        let verifier = Arc::new(BlockingVerifier { otps: otps.clone() });
        let manager = OtpManager::new(&stores, channels, Some(verifier), &AppConfig::default());

        let issued = manager
            .generate(OtpPurpose::ResetPin, OtpChannel::Sms, "62812", &test_subject(), None)
            .await
            .unwrap();

        let err = manager.verify(&issued.record.code, &issued.verify_key).await.unwrap_err();
        assert!(matches!(err, AuthError::OtpBlocked));
        assert_eq!(otps.all()[0].status, "Blocked");
    }

    #[tokio::test]
    async fn test_verify_follows_delivery_report_past_stale_cache() {
        let f = fixture();
        let issued = f
            .manager
            .generate(OtpPurpose::ResetPin, OtpChannel::Sms, "62812", &test_subject(), None)
            .await
            .unwrap();
        // Status moves in the ledger while the cached copy keeps the old one
        f.otps.set_status(issued.record.id, OtpStatus::Sent.as_str()).await.unwrap();

        let verified = f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap();
        assert_eq!(verified.status, OtpStatus::Verified);
        assert_eq!(f.otps.all()[0].status, "Verified");
    }

    #[tokio::test]
    async fn test_code_reservation_is_bounded() {
        let config = AppConfig {
            otp_length: 1,
            otp_generate_attempts: 5,
            ..AppConfig::default()
        };
        let f = fixture_with(
            RecordingChannel::new(OtpChannel::Email),
            RecordingChannel::new(OtpChannel::Sms),
            RecordingVerifier::default(),
            config,
        );
        for digit in 0..10 {
            let key = keys::otp("vk-full", &digit.to_string());
            f.cache.set(&key, ACTIVE, Duration::from_secs(60)).await.unwrap();
        }

        let err = f
            .manager
            .generate(
                OtpPurpose::VerifyAccount,
                OtpChannel::Email,
                "a@b.com",
                &test_subject(),
                Some("vk-full".to_string()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert!(f.otps.all().is_empty());
        assert!(f.email.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_adapter_is_config_error() {
        let f = fixture();
        let err = f
            .manager
            .generate(OtpPurpose::ResetEmail, OtpChannel::WhatsApp, "62812", &test_subject(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[tokio::test]
    async fn test_delivery_reports() {
        let f = fixture();
        let issued = f
            .manager
            .generate(OtpPurpose::ResetPin, OtpChannel::Sms, "62812", &test_subject(), None)
            .await
            .unwrap();
        let session = issued.record.session_id.clone();

        // Blocked by the provider
        let updated = f
            .manager
            .apply_delivery_report(&session, OtpChannel::Sms, 9)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OtpStatus::Blocked);

        let err = f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap_err();
        assert!(matches!(err, AuthError::OtpBlocked));

        // Blocked is absorbing
        let ignored = f.manager.apply_delivery_report(&session, OtpChannel::Sms, 1).await.unwrap();
        assert!(ignored.is_none());

        // Unknown code
        assert!(f
            .manager
            .apply_delivery_report(&session, OtpChannel::Sms, 42)
            .await
            .unwrap()
            .is_none());

        assert!(matches!(
            f.manager.apply_delivery_report("missing", OtpChannel::Sms, 1).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_not_verified_report_is_terminal() {
        let f = fixture();
        let issued = f
            .manager
            .generate(OtpPurpose::ResetPin, OtpChannel::Sms, "62812", &test_subject(), None)
            .await
            .unwrap();
        f.manager
            .apply_delivery_report(&issued.record.session_id, OtpChannel::Sms, 3)
            .await
            .unwrap();

        let err = f.manager.verify(&issued.record.code, &issued.verify_key).await.unwrap_err();
        assert!(matches!(err, AuthError::OtpNotVerifiable(ref s) if s == "Not Verified"));
    }
}
