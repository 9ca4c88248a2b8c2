//! Core authentication types
//!
//! Shared types used across all authentication components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identity Types
// =============================================================================

/// Account role carried in token claims.
///
/// Compared case-insensitively; roles this crate does not know are kept
/// verbatim so allow-lists can still name them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    #[default]
    User,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "USER",
            Self::Other(name) => name,
        }
    }

    /// Case-insensitive match against an allow-list entry
    pub fn matches(&self, allowed: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(allowed)
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.as_str())
    }
}

impl Eq for Role {}

impl From<String> for Role {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("USER") {
            Self::User
        } else {
            Self::Other(value)
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The account a token, OTP or access grant is issued for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Numeric account id
    pub id: i64,
    /// Public account identifier, embedded in tokens as `uuid`
    pub uuid: Uuid,
    pub username: String,
    pub role: Role,
}

/// Identity established by a verified access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedSubject {
    pub uuid: Uuid,
    pub username: String,
    pub role: Role,
    /// Access token expiry (unix seconds)
    pub expires_at: i64,
}

impl From<TokenClaims> for AuthenticatedSubject {
    fn from(claims: TokenClaims) -> Self {
        Self {
            uuid: claims.uuid,
            username: claims.username,
            role: claims.role,
            expires_at: claims.exp,
        }
    }
}

// =============================================================================
// Token Types
// =============================================================================

/// Which key pair a token was minted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Access,
    Refresh,
}

/// Claims embedded in both access and refresh tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject identifier
    pub uuid: Uuid,
    pub username: String,
    pub role: Role,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    pub purpose: TokenPurpose,
}

/// Access/refresh pair returned from issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Access token expiry (unix seconds)
    pub access_expires_at: i64,
    pub refresh_token: String,
    /// Refresh token expiry (unix seconds)
    pub refresh_expires_at: i64,
    /// Always "Bearer"
    pub token_type: String,
}

impl TokenPair {
    pub fn new(
        access_token: String,
        access_expires_at: i64,
        refresh_token: String,
        refresh_expires_at: i64,
    ) -> Self {
        Self {
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
        }
    }
}

// =============================================================================
// OTP and Access Grant Enumerations
// =============================================================================

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::AuthError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::error::AuthError::Internal(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Why an OTP was requested
    OtpPurpose {
        VerifyAccount => "OTP_VERIFY_ACCOUNT",
        ResetPin => "OTP_RESET_PIN",
        ForgotPin => "OTP_FORGOT_PIN",
        ResetEmail => "OTP_RESET_EMAIL",
        ResetPhoneNumber => "OTP_RESET_PHONE_NUMBER",
    }
}

string_enum! {
    /// Delivery channel, persisted as the OTP `method`
    OtpChannel {
        Email => "EMAIL",
        Sms => "SMS",
        WhatsApp => "WHATSAPP",
    }
}

string_enum! {
    /// Privileged follow-up action an access grant authorizes
    AccessType {
        SetPin => "SET_PIN",
        ForgotPin => "FORGOT_PIN",
        ResetPin => "RESET_PIN",
        ResetEmail => "RESET_EMAIL",
        ResetPhoneNumber => "RESET_PHONE_NUMBER",
        DeleteAccount => "DELETE_ACCOUNT",
    }
}

impl OtpPurpose {
    /// Access grant issued once an OTP for this purpose is verified
    pub fn grant_type(&self) -> AccessType {
        match self {
            Self::VerifyAccount => AccessType::SetPin,
            Self::ForgotPin => AccessType::ForgotPin,
            Self::ResetPin => AccessType::ResetPin,
            Self::ResetEmail => AccessType::ResetEmail,
            Self::ResetPhoneNumber => AccessType::ResetPhoneNumber,
        }
    }
}

/// Single-use authorization for one privileged follow-up action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: Uuid,
    pub access_type: AccessType,
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub device_id: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}
