//! Token Service
//!
//! RSA-signed (RS512) access and refresh tokens with:
//! - Separate key pairs for access and refresh tokens
//! - Strict algorithm checking (anything but RSA is rejected, `none` included)
//! - A transient revocation cache for access tokens, bounded by their
//!   remaining lifetime
//! - A durable revocation ledger for refresh tokens
//!
//! Lifecycle: `ISSUED -> ACTIVE | REVOKED | EXPIRED`, with no way back from
//! revoked or expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use uuid::Uuid;

use mbank_db::cache::{keys, ACTIVE};
use mbank_db::{CacheStore, NewRevokedToken, RevokedTokenStore, Stores};

use crate::config::{JwtConfig, RevocationExpiry};
use crate::deadline;
use crate::error::{AuthError, AuthResult};
use crate::types::{AuthenticatedSubject, Role, Subject, TokenClaims, TokenPair, TokenPurpose};

const BEARER_PREFIX: &str = "Bearer ";
const RSA_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Description stored on ledger rows written by logout
pub const LOGOUT_REASON: &str = "refresh-token log-out";

/// Issues, verifies, refreshes and revokes token pairs
#[derive(Clone)]
pub struct TokenService {
    config: JwtConfig,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    cache: Arc<dyn CacheStore>,
    revoked: Arc<dyn RevokedTokenStore>,
    timeout: std::time::Duration,
}

impl TokenService {
    /// Create a token service from PEM keys
    pub fn new(config: JwtConfig, stores: &Stores, timeout: std::time::Duration) -> AuthResult<Self> {
        let pem = |name: &str, value: &str| -> AuthResult<Vec<u8>> {
            if value.trim().is_empty() {
                return Err(AuthError::Config(format!("{} is empty", name)));
            }
            Ok(value.as_bytes().to_vec())
        };
        let bad_key = |name: &'static str| {
            move |e: jsonwebtoken::errors::Error| AuthError::Config(format!("{}: {}", name, e))
        };

        let access_encoding = EncodingKey::from_rsa_pem(&pem("access private key", &config.access_private_key_pem)?)
            .map_err(bad_key("access private key"))?;
        let access_decoding = DecodingKey::from_rsa_pem(&pem("access public key", &config.access_public_key_pem)?)
            .map_err(bad_key("access public key"))?;
        let refresh_encoding = EncodingKey::from_rsa_pem(&pem("refresh private key", &config.refresh_private_key_pem)?)
            .map_err(bad_key("refresh private key"))?;
        let refresh_decoding = DecodingKey::from_rsa_pem(&pem("refresh public key", &config.refresh_public_key_pem)?)
            .map_err(bad_key("refresh public key"))?;

        if config.revocation_expiry == RevocationExpiry::LegacyOffset {
            tracing::warn!(
                "revocation ledger uses legacy expiry offsets; revoked refresh tokens may lapse early"
            );
        }

        Ok(Self {
            config,
            access_encoding,
            access_decoding,
            refresh_encoding,
            refresh_decoding,
            cache: stores.cache.clone(),
            revoked: stores.revoked.clone(),
            timeout,
        })
    }

    /// Mint a fresh access/refresh pair for `subject`. No side effects.
    pub fn issue(&self, subject: &Subject) -> AuthResult<TokenPair> {
        self.mint(subject.uuid, &subject.username, &subject.role)
    }

    fn mint(&self, uuid: Uuid, username: &str, role: &Role) -> AuthResult<TokenPair> {
        let now = Utc::now();
        let access_exp = now + to_chrono(self.config.access_token_lifetime)?;
        let refresh_exp = now + to_chrono(self.config.refresh_token_lifetime)?;

        let access_token = self.sign(uuid, username, role, now, access_exp, TokenPurpose::Access)?;
        let refresh_token = self.sign(uuid, username, role, now, refresh_exp, TokenPurpose::Refresh)?;

        Ok(TokenPair::new(
            access_token,
            access_exp.timestamp(),
            refresh_token,
            refresh_exp.timestamp(),
        ))
    }

    /// Verify signature, algorithm and expiry against the key pair for
    /// `purpose`, returning the claims.
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> AuthResult<TokenClaims> {
        self.decode_claims(token, purpose, true)
    }

    /// Authenticate an `Authorization` header value.
    ///
    /// Revoked access tokens are rejected before their signature is even
    /// looked at. When `allowed_roles` is given the claimed role must match
    /// one entry, case-insensitively.
    pub async fn authenticate_request(
        &self,
        authorization: Option<&str>,
        allowed_roles: Option<&[String]>,
    ) -> AuthResult<AuthenticatedSubject> {
        let token = bearer_token(authorization).ok_or(AuthError::MissingToken)?;

        let key = keys::revoked_access(token);
        let revoked = deadline::store(self.timeout, "cache.revoked_access", self.cache.exists(&key)).await?;
        if revoked {
            return Err(AuthError::TokenRevoked);
        }

        let claims = self.verify(token, TokenPurpose::Access)?;

        if let Some(roles) = allowed_roles {
            if !roles.iter().any(|allowed| claims.role.matches(allowed)) {
                tracing::debug!(role = %claims.role, "role not in allow-list");
                return Err(AuthError::ForbiddenRole);
            }
        }

        Ok(claims.into())
    }

    /// Exchange a refresh token for a brand-new pair.
    ///
    /// The new pair carries the identity signed into the refresh token;
    /// `expected` only has to match it. Only signature, expiry and subject
    /// are checked here; callers that need the revocation ledger consult
    /// [`TokenService::is_refresh_revoked`] first.
    pub fn refresh(&self, refresh_token: &str, expected: Uuid) -> AuthResult<TokenPair> {
        let claims = self.verify(refresh_token, TokenPurpose::Refresh)?;
        if claims.uuid != expected {
            tracing::warn!(claimed = %claims.uuid, expected = %expected, "refresh token subject mismatch");
            return Err(AuthError::SubjectMismatch);
        }
        self.mint(claims.uuid, &claims.username, &claims.role)
    }

    /// Logout: park the access token in the revocation cache for exactly its
    /// remaining lifetime, and write the refresh token to the durable ledger.
    pub async fn revoke(&self, access_token: &str, refresh_token: &str) -> AuthResult<()> {
        let (access, refresh) = tokio::join!(
            async { self.decode_claims(access_token, TokenPurpose::Access, false) },
            async { self.decode_claims(refresh_token, TokenPurpose::Refresh, false) },
        );
        let (access, refresh) = (access?, refresh?);

        let now = Utc::now();
        let remaining = access.exp - now.timestamp();
        if remaining > 0 {
            let key = keys::revoked_access(access_token);
            let ttl = std::time::Duration::from_secs(remaining as u64);
            deadline::store(self.timeout, "cache.revoke_access", self.cache.set(&key, ACTIVE, ttl)).await?;
        }

        let entry = NewRevokedToken {
            token: refresh_token.to_string(),
            blacklist_at: now,
            expired_at: self.ledger_expiry(now, refresh.exp)?,
            description: LOGOUT_REASON.to_string(),
        };
        deadline::store(self.timeout, "ledger.insert", self.revoked.insert(entry)).await?;

        tracing::info!(subject = %access.uuid, "tokens revoked");
        Ok(())
    }

    /// Whether the durable ledger holds an unexpired entry for `refresh_token`
    pub async fn is_refresh_revoked(&self, refresh_token: &str) -> AuthResult<bool> {
        deadline::store(
            self.timeout,
            "ledger.is_revoked",
            self.revoked.is_revoked(refresh_token, Utc::now()),
        )
        .await
    }

    /// Delete ledger rows whose expiry is at or before `now`
    pub async fn purge_revoked(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        deadline::store(self.timeout, "ledger.purge", self.revoked.purge_expired(now)).await
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    fn sign(
        &self,
        uuid: Uuid,
        username: &str,
        role: &Role,
        now: DateTime<Utc>,
        exp: DateTime<Utc>,
        purpose: TokenPurpose,
    ) -> AuthResult<String> {
        let claims = TokenClaims {
            uuid,
            username: username.to_string(),
            role: role.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            purpose,
        };
        let key = match purpose {
            TokenPurpose::Access => &self.access_encoding,
            TokenPurpose::Refresh => &self.refresh_encoding,
        };
        encode(&Header::new(Algorithm::RS512), &claims, key)
            .map_err(|e| AuthError::Internal(format!("Failed to sign {:?} token: {}", purpose, e)))
    }

    fn decode_claims(&self, token: &str, purpose: TokenPurpose, check_exp: bool) -> AuthResult<TokenClaims> {
        let alg = header_algorithm(token)?;
        if !RSA_ALGORITHMS.iter().any(|a| format!("{:?}", a) == alg) {
            return Err(AuthError::TokenWrongAlgorithm);
        }

        let mut validation = Validation::new(Algorithm::RS512);
        validation.algorithms = RSA_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.validate_exp = check_exp;

        let key = match purpose {
            TokenPurpose::Access => &self.access_decoding,
            TokenPurpose::Refresh => &self.refresh_decoding,
        };
        let claims = decode::<TokenClaims>(token, key, &validation)?.claims;

        if claims.purpose != purpose {
            return Err(AuthError::TokenMalformed);
        }
        Ok(claims)
    }

    fn ledger_expiry(&self, now: DateTime<Utc>, refresh_exp: i64) -> AuthResult<DateTime<Utc>> {
        match self.config.revocation_expiry {
            RevocationExpiry::TokenExpiry => DateTime::from_timestamp(refresh_exp, 0)
                .ok_or_else(|| AuthError::Internal(format!("refresh exp {} out of range", refresh_exp))),
            RevocationExpiry::LegacyOffset => Ok(now + Duration::nanoseconds(refresh_exp)),
        }
    }
}

/// Token carried by an `Authorization: Bearer <token>` header value
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Read `alg` from the JOSE header without trusting anything else
fn header_algorithm(token: &str) -> AuthResult<String> {
    let header = token
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or(AuthError::TokenMalformed)?;
    let raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthError::TokenMalformed)?;
    let value: serde_json::Value = serde_json::from_slice(&raw).map_err(|_| AuthError::TokenMalformed)?;
    value
        .get("alg")
        .and_then(|alg| alg.as_str())
        .map(str::to_string)
        .ok_or(AuthError::TokenMalformed)
}

fn to_chrono(duration: std::time::Duration) -> AuthResult<Duration> {
    Duration::from_std(duration).map_err(|e| AuthError::Internal(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_jwt_config() -> JwtConfig {
        JwtConfig {
            access_private_key_pem: include_str!("../testdata/access_private.pem").to_string(),
            access_public_key_pem: include_str!("../testdata/access_public.pem").to_string(),
            refresh_private_key_pem: include_str!("../testdata/refresh_private.pem").to_string(),
            refresh_public_key_pem: include_str!("../testdata/refresh_public.pem").to_string(),
            ..JwtConfig::default()
        }
    }

    pub(crate) fn test_subject() -> Subject {
        Subject {
            id: 42,
            uuid: Uuid::new_v4(),
            username: "ayu".to_string(),
            role: Role::User,
        }
    }

    fn service_with(stores: &Stores) -> TokenService {
        TokenService::new(test_jwt_config(), stores, std::time::Duration::from_secs(2)).unwrap()
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    #[test]
    fn test_issue_expiries_follow_config() {
        let service = service_with(&Stores::in_memory());
        let before = Utc::now().timestamp();
        let pair = service.issue(&test_subject()).unwrap();

        assert_eq!(pair.token_type, "Bearer");
        assert!((pair.access_expires_at - (before + 15 * 60)).abs() <= 1);
        assert!((pair.refresh_expires_at - (before + 7 * 24 * 60 * 60)).abs() <= 1);
        assert_ne!(pair.access_token, pair.refresh_token);
    }

    #[test]
    fn test_verify_round_trip_claims() {
        let service = service_with(&Stores::in_memory());
        let subject = test_subject();
        let pair = service.issue(&subject).unwrap();

        let claims = service.verify(&pair.access_token, TokenPurpose::Access).unwrap();
        assert_eq!(claims.uuid, subject.uuid);
        assert_eq!(claims.username, "ayu");
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.exp, pair.access_expires_at);
    }

    #[test]
    fn test_access_token_fails_against_refresh_key() {
        let service = service_with(&Stores::in_memory());
        let pair = service.issue(&test_subject()).unwrap();

        let result = service.verify(&pair.access_token, TokenPurpose::Refresh);
        assert!(matches!(result, Err(AuthError::TokenInvalidSignature)));

        let result = service.verify(&pair.refresh_token, TokenPurpose::Access);
        assert!(matches!(result, Err(AuthError::TokenInvalidSignature)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = service_with(&Stores::in_memory());
        let subject = test_subject();
        let now = Utc::now();
        let token = service
            .sign(subject.uuid, &subject.username, &subject.role, now - Duration::hours(2), now - Duration::hours(1), TokenPurpose::Access)
            .unwrap();

        assert!(matches!(
            service.verify(&token, TokenPurpose::Access),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_none_and_hmac_algorithms_rejected() {
        let service = service_with(&Stores::in_memory());
        let claims = serde_json::json!({
            "uuid": Uuid::new_v4(), "username": "x", "role": "USER",
            "iat": 0, "exp": 4_102_444_800i64, "purpose": "access"
        });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

        let none_header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let unsigned = format!("{}.{}.", none_header, payload);
        assert!(matches!(
            service.verify(&unsigned, TokenPurpose::Access),
            Err(AuthError::TokenWrongAlgorithm)
        ));

        let hs = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"public-key-as-secret"),
        )
        .unwrap();
        assert!(matches!(
            service.verify(&hs, TokenPurpose::Access),
            Err(AuthError::TokenWrongAlgorithm)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let service = service_with(&Stores::in_memory());
        assert!(matches!(
            service.verify("not-a-token", TokenPurpose::Access),
            Err(AuthError::TokenMalformed)
        ));
        assert!(matches!(
            service.verify("", TokenPurpose::Access),
            Err(AuthError::TokenMalformed)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_requires_bearer_prefix() {
        let service = service_with(&Stores::in_memory());
        let pair = service.issue(&test_subject()).unwrap();

        let result = service.authenticate_request(Some(&pair.access_token), None).await;
        assert!(matches!(result, Err(AuthError::MissingToken)));

        let result = service.authenticate_request(None, None).await;
        assert!(matches!(result, Err(AuthError::MissingToken)));

        let subject = service
            .authenticate_request(Some(&bearer(&pair.access_token)), None)
            .await
            .unwrap();
        assert_eq!(subject.expires_at, pair.access_expires_at);
    }

    #[tokio::test]
    async fn test_role_allow_list() {
        let service = service_with(&Stores::in_memory());
        let pair = service.issue(&test_subject()).unwrap();
        let header = bearer(&pair.access_token);

        let allowed = vec!["user".to_string()];
        assert!(service.authenticate_request(Some(&header), Some(&allowed)).await.is_ok());

        let admins = vec!["ADMIN".to_string()];
        let result = service.authenticate_request(Some(&header), Some(&admins)).await;
        assert!(matches!(result, Err(AuthError::ForbiddenRole)));
    }

    #[tokio::test]
    async fn test_refresh_requires_matching_subject() {
        let service = service_with(&Stores::in_memory());
        let subject = test_subject();
        let pair = service.issue(&subject).unwrap();

        let renewed = service.refresh(&pair.refresh_token, subject.uuid).unwrap();
        assert!(service.verify(&renewed.access_token, TokenPurpose::Access).is_ok());

        let stranger = test_subject();
        assert!(matches!(
            service.refresh(&pair.refresh_token, stranger.uuid),
            Err(AuthError::SubjectMismatch)
        ));

        // An access token is not a refresh token
        assert!(service.refresh(&pair.access_token, subject.uuid).is_err());
    }

    #[tokio::test]
    async fn test_refresh_keeps_signed_identity() {
        let service = service_with(&Stores::in_memory());
        let subject = test_subject();
        let pair = service.issue(&subject).unwrap();

        let renewed = service.refresh(&pair.refresh_token, subject.uuid).unwrap();
        let access = service.verify(&renewed.access_token, TokenPurpose::Access).unwrap();
        assert_eq!(access.uuid, subject.uuid);
        assert_eq!(access.username, subject.username);
        assert_eq!(access.role, Role::User);

        let refresh = service.verify(&renewed.refresh_token, TokenPurpose::Refresh).unwrap();
        assert_eq!(refresh.role, Role::User);
        assert_eq!(refresh.username, subject.username);
    }

    #[tokio::test]
    async fn test_revoke_blocks_access_and_records_refresh() {
        let stores = Stores::in_memory();
        let service = service_with(&stores);
        let pair = service.issue(&test_subject()).unwrap();
        let header = bearer(&pair.access_token);

        assert!(service.authenticate_request(Some(&header), None).await.is_ok());
        service.revoke(&pair.access_token, &pair.refresh_token).await.unwrap();

        // Signature and expiry are still fine on their own
        assert!(service.verify(&pair.access_token, TokenPurpose::Access).is_ok());
        let result = service.authenticate_request(Some(&header), None).await;
        assert!(matches!(result, Err(AuthError::TokenRevoked)));
        assert_eq!(result.unwrap_err().kind(), crate::error::ErrorKind::Unauthenticated);

        assert!(service.is_refresh_revoked(&pair.refresh_token).await.unwrap());
        assert!(!service.is_refresh_revoked(&pair.access_token).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_rejects_forged_tokens() {
        let service = service_with(&Stores::in_memory());
        let pair = service.issue(&test_subject()).unwrap();

        // Swapped tokens fail signature checks against their expected keys
        let result = service.revoke(&pair.refresh_token, &pair.access_token).await;
        assert!(matches!(result, Err(AuthError::TokenInvalidSignature)));
    }

    #[test]
    fn test_ledger_expiry_policies() {
        let stores = Stores::in_memory();
        let mut service = service_with(&stores);
        let now = Utc::now();
        let exp = (now + Duration::days(7)).timestamp();

        assert_eq!(service.ledger_expiry(now, exp).unwrap().timestamp(), exp);

        service.config.revocation_expiry = RevocationExpiry::LegacyOffset;
        let legacy = service.ledger_expiry(now, exp).unwrap();
        assert!(legacy - now < Duration::seconds(5));
    }

    #[test]
    fn test_bad_pem_is_config_error() {
        let mut config = test_jwt_config();
        config.refresh_public_key_pem = "not a pem".to_string();
        let result = TokenService::new(config, &Stores::in_memory(), std::time::Duration::from_secs(1));
        assert!(matches!(result, Err(AuthError::Config(_))));
    }
}
