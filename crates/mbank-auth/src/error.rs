//! Authentication error types
//!
//! Every failure in the request pipeline and OTP lifecycle is an
//! [`AuthError`]. Each variant belongs to one [`ErrorKind`] category, maps to
//! an HTTP status and a stable machine-readable code, and knows which message
//! is safe to show a client. Storage and upstream details never leave the
//! process; they are logged and collapsed to a generic "server busy" message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mbank_db::DbError;

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Coarse error taxonomy shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Replay,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    UpstreamFailure,
    Internal,
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    // =========================================================================
    // Request Validation
    // =========================================================================
    /// One or more mandatory headers are absent
    #[error("{0} is required")]
    MissingHeader(String),

    /// A header is present but cannot be parsed
    #[error("{0} is wrong format")]
    MalformedHeader(String),

    /// Recomputed digest does not match `X-SIGNATURE`
    #[error("Invalid signature")]
    BadSignature,

    /// Declared JSON body is empty or not JSON
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Nonce seen within the anti-replay window
    #[error("Request replay detected")]
    ReplayDetected,

    // =========================================================================
    // Token Errors
    // =========================================================================
    /// No bearer token, or missing `Bearer ` prefix
    #[error("Authentication required")]
    MissingToken,

    /// Token could not be decoded
    #[error("Malformed token")]
    TokenMalformed,

    /// Token has expired
    #[error("Token has expired")]
    TokenExpired,

    /// Token was signed with something other than RS512
    #[error("Unexpected signing algorithm")]
    TokenWrongAlgorithm,

    /// Signature does not verify against the expected public key
    #[error("Invalid token signature")]
    TokenInvalidSignature,

    /// Token has been revoked
    #[error("Token has been revoked")]
    TokenRevoked,

    /// Refresh token belongs to someone else
    #[error("Token subject mismatch")]
    SubjectMismatch,

    /// Role claim not in the path's allow-list
    #[error("Role not allowed for this resource")]
    ForbiddenRole,

    // =========================================================================
    // OTP Errors
    // =========================================================================
    /// Code does not match, or no OTP exists for the verify key
    #[error("Invalid OTP code")]
    InvalidOtp,

    /// OTP record is blocked
    #[error("OTP is blocked")]
    OtpBlocked,

    /// OTP has expired
    #[error("OTP has expired")]
    OtpExpired,

    /// OTP was already used
    #[error("OTP already verified")]
    OtpAlreadyVerified,

    /// OTP ended in a terminal non-verified state
    #[error("OTP can no longer be verified (status {0})")]
    OtpNotVerifiable(String),

    // =========================================================================
    // Access Grant Errors
    // =========================================================================
    /// No such record
    #[error("{0} not found")]
    NotFound(String),

    /// Access grant already consumed
    #[error("Access grant already used")]
    GrantUsed,

    /// Access grant has expired
    #[error("Access grant has expired")]
    GrantExpired,

    // =========================================================================
    // Rate Limiting
    // =========================================================================
    /// Rate limit exceeded
    #[error("Rate limit exceeded, try again in {retry_after} seconds")]
    RateLimitExceeded {
        /// Seconds until a token is available again
        retry_after: u64,
    },

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    /// Channel adapter or verification provider failed
    #[error("Upstream failure: {0}")]
    Upstream(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Redis/cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// A deadline elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not be exposed to clients)
    #[error("Internal error: {0}")]
    Internal(String),
}

const SERVER_BUSY: &str = "Server busy, please try again later";

impl AuthError {
    /// Taxonomy category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingHeader(_)
            | Self::MalformedHeader(_)
            | Self::BadSignature
            | Self::InvalidPayload(_)
            | Self::InvalidOtp
            | Self::OtpExpired
            | Self::GrantExpired => ErrorKind::Validation,

            Self::ReplayDetected => ErrorKind::Replay,

            Self::MissingToken
            | Self::TokenMalformed
            | Self::TokenExpired
            | Self::TokenWrongAlgorithm
            | Self::TokenInvalidSignature
            | Self::TokenRevoked
            | Self::SubjectMismatch => ErrorKind::Unauthenticated,

            Self::ForbiddenRole | Self::OtpBlocked => ErrorKind::Forbidden,

            Self::NotFound(_) => ErrorKind::NotFound,

            Self::OtpAlreadyVerified | Self::OtpNotVerifiable(_) | Self::GrantUsed => {
                ErrorKind::Conflict
            }

            Self::RateLimitExceeded { .. } => ErrorKind::RateLimited,

            Self::Upstream(_) => ErrorKind::UpstreamFailure,

            Self::Database(_)
            | Self::Cache(_)
            | Self::Timeout(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::OtpExpired | Self::GrantExpired => 410,
            _ => match self.kind() {
                ErrorKind::Validation => 400,
                ErrorKind::Replay => 409,
                ErrorKind::Unauthenticated => 401,
                ErrorKind::Forbidden => 403,
                ErrorKind::NotFound => 404,
                ErrorKind::Conflict => 409,
                ErrorKind::RateLimited => 429,
                ErrorKind::UpstreamFailure => 502,
                ErrorKind::Internal => 500,
            },
        }
    }

    /// Get an error code for the client (safe to expose)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingHeader(_) | Self::MalformedHeader(_) => "MISSING_HEADER",
            Self::BadSignature => "BAD_SIGNATURE",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::MissingToken => "UNAUTHENTICATED",
            Self::TokenMalformed => "TOKEN_MALFORMED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenWrongAlgorithm => "WRONG_ALGORITHM",
            Self::TokenInvalidSignature => "INVALID_SIGNATURE",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::SubjectMismatch => "UNAUTHENTICATED",
            Self::ForbiddenRole => "FORBIDDEN_ROLE",
            Self::InvalidOtp => "INVALID_OTP",
            Self::OtpBlocked => "OTP_BLOCKED",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::OtpAlreadyVerified => "ALREADY_VERIFIED",
            Self::OtpNotVerifiable(_) => "OTP_NOT_VERIFIABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::GrantUsed => "GRANT_USED",
            Self::GrantExpired => "GRANT_EXPIRED",
            Self::RateLimitExceeded { .. } => "RATE_LIMITED",
            Self::Upstream(_) => "UPSTREAM_FAILURE",
            Self::Database(_)
            | Self::Cache(_)
            | Self::Timeout(_)
            | Self::Config(_)
            | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Get safe message for client (doesn't leak internal details)
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal | ErrorKind::UpstreamFailure => SERVER_BUSY.to_string(),
            _ => self.to_string(),
        }
    }

    /// Create a rate limit error with retry-after duration
    pub fn rate_limited(duration: std::time::Duration) -> Self {
        // Round up so clients never retry a fraction of a second early
        let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        Self::RateLimitExceeded { retry_after: secs }
    }
}

/// Error response for API clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (machine-readable)
    pub code: String,
    /// Error message (human-readable)
    pub message: String,
    /// Retry-after in seconds (for rate limiting)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&AuthError> for ErrorResponse {
    fn from(error: &AuthError) -> Self {
        let retry_after = match error {
            AuthError::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.client_message(),
            retry_after,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtKind;
        match err.kind() {
            JwtKind::ExpiredSignature => Self::TokenExpired,
            JwtKind::InvalidSignature => Self::TokenInvalidSignature,
            JwtKind::InvalidAlgorithm | JwtKind::InvalidAlgorithmName => Self::TokenWrongAlgorithm,
            _ => Self::TokenMalformed,
        }
    }
}

impl From<DbError> for AuthError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Self::NotFound(what),
            DbError::Redis(msg) => Self::Cache(msg),
            DbError::Serialization(msg) => Self::Internal(msg),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::MissingHeader("X-NONCE".into()).status_code(), 400);
        assert_eq!(AuthError::ReplayDetected.status_code(), 409);
        assert_eq!(AuthError::TokenRevoked.status_code(), 401);
        assert_eq!(AuthError::ForbiddenRole.status_code(), 403);
        assert_eq!(AuthError::OtpExpired.status_code(), 410);
        assert_eq!(AuthError::OtpAlreadyVerified.status_code(), 409);
        assert_eq!(AuthError::RateLimitExceeded { retry_after: 12 }.status_code(), 429);
        assert_eq!(AuthError::Upstream("smtp".into()).status_code(), 502);
        assert_eq!(AuthError::Database("down".into()).status_code(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthError::BadSignature.error_code(), "BAD_SIGNATURE");
        assert_eq!(AuthError::MissingToken.error_code(), "UNAUTHENTICATED");
        assert_eq!(AuthError::TokenWrongAlgorithm.error_code(), "WRONG_ALGORITHM");
        assert_eq!(AuthError::InvalidOtp.error_code(), "INVALID_OTP");
        assert_eq!(AuthError::Timeout("cache".into()).error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(AuthError::InvalidPayload("empty".into()).kind(), ErrorKind::Validation);
        assert_eq!(AuthError::SubjectMismatch.kind(), ErrorKind::Unauthenticated);
        assert_eq!(AuthError::GrantUsed.kind(), ErrorKind::Conflict);
        assert_eq!(AuthError::NotFound("otp".into()).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = AuthError::Database("connection refused on 10.0.0.5".into());
        assert_eq!(err.client_message(), SERVER_BUSY);

        let err = AuthError::Upstream("provider returned 503".into());
        assert!(!err.client_message().contains("503"));

        let err = AuthError::MissingHeader("X-NONCE, X-DEVICE-ID".into());
        assert_eq!(err.client_message(), "X-NONCE, X-DEVICE-ID is required");

        let err = AuthError::NotFound("access grant".into());
        assert_eq!(err.client_message(), "access grant not found");
    }

    #[test]
    fn test_error_response_carries_retry_after() {
        let err = AuthError::rate_limited(std::time::Duration::from_millis(11_200));
        let body = ErrorResponse::from(&err);
        assert_eq!(body.code, "RATE_LIMITED");
        assert_eq!(body.retry_after, Some(12));
    }

    #[test]
    fn test_db_error_conversion() {
        assert!(matches!(
            AuthError::from(DbError::Redis("timeout".into())),
            AuthError::Cache(_)
        ));
        assert!(matches!(
            AuthError::from(DbError::NotFound("otp".into())),
            AuthError::NotFound(_)
        ));
    }
}
