//! Authentication configuration
//!
//! Every tunable of the request pipeline and the OTP lifecycle, with the
//! production defaults of the mobile backend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AuthError, AuthResult};

/// Main authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Lifetimes and deadlines
    #[serde(default)]
    pub app: AppConfig,
    /// RSA token configuration
    #[serde(default)]
    pub jwt: JwtConfig,
    /// SMS / WhatsApp verification provider
    #[serde(default)]
    pub verihubs: VerihubsConfig,
    /// Email OTP template
    #[serde(default)]
    pub email: EmailConfig,
    /// Per-client rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Request authenticator exemptions and role allow-lists
    #[serde(default)]
    pub guard: GuardConfig,
}

/// Lifetimes and deadlines shared by the OTP and access-grant flows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// How long an OTP stays verifiable
    #[serde(with = "humantime_serde")]
    pub otp_expire: Duration,
    /// How long an access grant stays consumable
    #[serde(with = "humantime_serde")]
    pub access_key_expire: Duration,
    /// Anti-replay window for request nonces
    #[serde(with = "humantime_serde")]
    pub xsession_expire: Duration,
    /// Deadline for every cache, store, channel and provider call
    #[serde(with = "humantime_serde")]
    pub context_timeout: Duration,
    /// Number of digits in a generated code
    pub otp_length: usize,
    /// Draws before giving up on finding an unused code
    pub otp_generate_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            otp_expire: Duration::from_secs(60),
            access_key_expire: Duration::from_secs(15 * 60),
            xsession_expire: Duration::from_secs(60),
            context_timeout: Duration::from_secs(2),
            otp_length: 6,
            otp_generate_attempts: 5,
        }
    }
}

/// How the durable revocation row's expiry is computed on logout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationExpiry {
    /// Use the refresh token's own `exp`
    #[default]
    TokenExpiry,
    /// `now` plus the raw `exp` value taken as a nanosecond offset. Kept only
    /// for parity with deployed data; see DESIGN.md.
    LegacyOffset,
}

/// RSA token configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// PKCS#8 PEM private key for access tokens
    pub access_private_key_pem: String,
    /// SPKI PEM public key for access tokens
    pub access_public_key_pem: String,
    /// PKCS#8 PEM private key for refresh tokens
    pub refresh_private_key_pem: String,
    /// SPKI PEM public key for refresh tokens
    pub refresh_public_key_pem: String,
    /// Access token lifetime
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,
    /// Refresh token lifetime
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,
    #[serde(default)]
    pub revocation_expiry: RevocationExpiry,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            access_private_key_pem: String::new(), // Must be set
            access_public_key_pem: String::new(),
            refresh_private_key_pem: String::new(),
            refresh_public_key_pem: String::new(),
            access_token_lifetime: Duration::from_secs(15 * 60), // 15 minutes
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            revocation_expiry: RevocationExpiry::TokenExpiry,
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_private_key_pem", &"<redacted>")
            .field("refresh_private_key_pem", &"<redacted>")
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("refresh_token_lifetime", &self.refresh_token_lifetime)
            .field("revocation_expiry", &self.revocation_expiry)
            .finish()
    }
}

/// SMS / WhatsApp OTP provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerihubsConfig {
    /// Provider API base URL
    pub base_url: String,
    /// Sent as `App-ID`
    pub app_id: String,
    /// Sent as `API-Key`
    pub api_key: String,
    /// Let the provider draw the code instead of sending ours
    pub provider_generates_code: bool,
    /// Delivery-report webhook
    pub callback_url: Option<String>,
    pub sms_template: Option<String>,
    pub sms_challenge: Option<String>,
    pub whatsapp_lang_code: String,
    pub whatsapp_template: String,
    pub whatsapp_otp_length: Option<String>,
}

impl Default for VerihubsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.verihubs.com".to_string(),
            app_id: String::new(),
            api_key: String::new(),
            provider_generates_code: false,
            callback_url: None,
            sms_template: None,
            sms_challenge: None,
            whatsapp_lang_code: "id".to_string(),
            whatsapp_template: "otp".to_string(),
            whatsapp_otp_length: None,
        }
    }
}

/// Email OTP template settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub subject: String,
    /// Closing line of the message
    pub signature: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            subject: "Verify OTP".to_string(),
            signature: "The mbank team".to_string(),
        }
    }
}

/// Token bucket settings, keyed per client IP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// One token is added back every interval
    #[serde(with = "humantime_serde")]
    pub replenish_interval: Duration,
    /// Bucket capacity
    pub burst: u32,
    /// Buckets idle this long are dropped by cleanup
    #[serde(with = "humantime_serde")]
    pub idle_eviction: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replenish_interval: Duration::from_secs(12),
            burst: 5,
            idle_eviction: Duration::from_secs(10 * 60),
        }
    }
}

/// Which validators run for which paths.
///
/// Path entries match exactly, or by prefix when they end in `*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub exempt_authorization: Vec<String>,
    pub exempt_headers: Vec<String>,
    pub exempt_signature: Vec<String>,
    pub exempt_nonce: Vec<String>,
    /// Roles allowed per path; paths absent here accept any authenticated role
    pub role_allow_list: HashMap<String, Vec<String>>,
    /// Run the nonce guard inside the concurrent validator group
    pub nonce_in_pipeline: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        let public = vec![
            "/health".to_string(),
            "/docs*".to_string(),
            "/v1/auth/login".to_string(),
            "/v1/auth/register".to_string(),
            "/v1/otp/request".to_string(),
            "/v1/otp/verify".to_string(),
            "/v1/token/refresh".to_string(),
            "/v1/grants/consume".to_string(),
            "/v1/webhooks/*".to_string(),
        ];
        Self {
            exempt_authorization: public,
            exempt_headers: vec!["/health".to_string(), "/docs*".to_string(), "/v1/webhooks/*".to_string()],
            exempt_signature: vec!["/health".to_string(), "/docs*".to_string(), "/v1/webhooks/*".to_string()],
            exempt_nonce: vec!["/health".to_string(), "/docs*".to_string(), "/v1/webhooks/*".to_string()],
            role_allow_list: HashMap::new(),
            nonce_in_pipeline: false,
        }
    }
}

impl AuthConfig {
    /// Create configuration from environment variables.
    ///
    /// PEM keys come from `MBANK_JWT_*_KEY` or, when that is unset, from the
    /// file named by `MBANK_JWT_*_KEY_FILE`.
    pub fn from_env() -> AuthResult<Self> {
        let mut config = Self::default();

        config.jwt.access_private_key_pem = pem_from_env("MBANK_JWT_ACCESS_PRIVATE_KEY")?;
        config.jwt.access_public_key_pem = pem_from_env("MBANK_JWT_ACCESS_PUBLIC_KEY")?;
        config.jwt.refresh_private_key_pem = pem_from_env("MBANK_JWT_REFRESH_PRIVATE_KEY")?;
        config.jwt.refresh_public_key_pem = pem_from_env("MBANK_JWT_REFRESH_PUBLIC_KEY")?;
        if let Some(secs) = env_secs("MBANK_JWT_ACCESS_LIFETIME_SECS") {
            config.jwt.access_token_lifetime = secs;
        }
        if let Some(secs) = env_secs("MBANK_JWT_REFRESH_LIFETIME_SECS") {
            config.jwt.refresh_token_lifetime = secs;
        }
        if std::env::var("MBANK_JWT_REVOCATION_EXPIRY").as_deref() == Ok("legacy_offset") {
            config.jwt.revocation_expiry = RevocationExpiry::LegacyOffset;
        }

        if let Some(secs) = env_secs("MBANK_OTP_EXPIRE_SECS") {
            config.app.otp_expire = secs;
        }
        if let Some(secs) = env_secs("MBANK_ACCESS_KEY_EXPIRE_SECS") {
            config.app.access_key_expire = secs;
        }
        if let Some(secs) = env_secs("MBANK_XSESSION_EXPIRE_SECS") {
            config.app.xsession_expire = secs;
        }
        if let Some(ms) = std::env::var("MBANK_CONTEXT_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()) {
            config.app.context_timeout = Duration::from_millis(ms);
        }

        if let Ok(url) = std::env::var("MBANK_VERIHUBS_URL") {
            config.verihubs.base_url = url;
        }
        if let Ok(app_id) = std::env::var("MBANK_VERIHUBS_APP_ID") {
            config.verihubs.app_id = app_id;
        }
        if let Ok(key) = std::env::var("MBANK_VERIHUBS_KEY") {
            config.verihubs.api_key = key;
        }
        if let Ok(flag) = std::env::var("MBANK_VERIHUBS_OTP_CODE") {
            config.verihubs.provider_generates_code = flag.eq_ignore_ascii_case("true");
        }
        config.verihubs.callback_url = std::env::var("MBANK_VERIHUBS_CALLBACK_URL").ok();

        if let Ok(flag) = std::env::var("MBANK_NONCE_IN_PIPELINE") {
            config.guard.nonce_in_pipeline = flag.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let keys = [
            ("access private key", &self.jwt.access_private_key_pem),
            ("access public key", &self.jwt.access_public_key_pem),
            ("refresh private key", &self.jwt.refresh_private_key_pem),
            ("refresh public key", &self.jwt.refresh_public_key_pem),
        ];
        for (name, pem) in keys {
            if pem.trim().is_empty() {
                errors.push(format!("JWT {} must be set", name));
            }
        }
        if self.jwt.access_private_key_pem == self.jwt.refresh_private_key_pem
            && !self.jwt.access_private_key_pem.is_empty()
        {
            errors.push("Access and refresh tokens must use different key pairs".to_string());
        }

        if self.app.otp_length < 4 {
            errors.push("OTP length should be at least 4 digits".to_string());
        }
        if self.app.otp_generate_attempts == 0 {
            errors.push("OTP generate attempts must be at least 1".to_string());
        }
        if self.app.xsession_expire.is_zero() {
            errors.push("Nonce window must be non-zero".to_string());
        }
        if self.app.context_timeout.is_zero() {
            errors.push("Context timeout must be non-zero".to_string());
        }
        if self.rate_limit.enabled && self.rate_limit.burst == 0 {
            errors.push("Rate limit burst must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn pem_from_env(key: &str) -> AuthResult<String> {
    if let Ok(pem) = std::env::var(key) {
        // Single-line env values carry escaped newlines
        return Ok(pem.replace("\\n", "\n"));
    }
    match std::env::var(format!("{}_FILE", key)) {
        Ok(path) => std::fs::read_to_string(&path)
            .map_err(|e| AuthError::Config(format!("reading {}: {}", path, e))),
        Err(_) => Ok(String::new()),
    }
}
