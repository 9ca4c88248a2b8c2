//! OTP state machine
//!
//! ```text
//! Requested -> Delivered -> Verified
//!     |            |
//!     +-> Failed, Sent, Read, Undelivered, ... (provider reports)
//!     +-> Blocked | Expired | Not Verified | Unverified | Rejected (absorbing)
//! ```
//!
//! Statuses are persisted as their display strings.

use serde::{Deserialize, Serialize};

use crate::types::OtpChannel;

/// Lifecycle status of an OTP record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtpStatus {
    #[serde(rename = "Requested")]
    Requested,
    #[serde(rename = "Delivered")]
    Delivered,
    #[serde(rename = "Sent")]
    Sent,
    #[serde(rename = "Read")]
    Read,
    #[serde(rename = "Verified")]
    Verified,
    #[serde(rename = "Not Verified")]
    NotVerified,
    #[serde(rename = "Unverified")]
    Unverified,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "Request Error")]
    RequestError,
    #[serde(rename = "Rejected")]
    Rejected,
    #[serde(rename = "Undelivered")]
    Undelivered,
    #[serde(rename = "No Delivery Report")]
    NoDeliveryReport,
    #[serde(rename = "Blocked")]
    Blocked,
    #[serde(rename = "Tier Limit Exceeded")]
    TierLimitExceeded,
    #[serde(rename = "Expired")]
    Expired,
}

impl OtpStatus {
    pub const ALL: [OtpStatus; 15] = [
        Self::Requested,
        Self::Delivered,
        Self::Sent,
        Self::Read,
        Self::Verified,
        Self::NotVerified,
        Self::Unverified,
        Self::Failed,
        Self::RequestError,
        Self::Rejected,
        Self::Undelivered,
        Self::NoDeliveryReport,
        Self::Blocked,
        Self::TierLimitExceeded,
        Self::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "Requested",
            Self::Delivered => "Delivered",
            Self::Sent => "Sent",
            Self::Read => "Read",
            Self::Verified => "Verified",
            Self::NotVerified => "Not Verified",
            Self::Unverified => "Unverified",
            Self::Failed => "Failed",
            Self::RequestError => "Request Error",
            Self::Rejected => "Rejected",
            Self::Undelivered => "Undelivered",
            Self::NoDeliveryReport => "No Delivery Report",
            Self::Blocked => "Blocked",
            Self::TierLimitExceeded => "Tier Limit Exceeded",
            Self::Expired => "Expired",
        }
    }

    /// Absorbing states. `Failed` is deliberately not one of them: the code
    /// may still have reached the user through the provider.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Verified
                | Self::Blocked
                | Self::Expired
                | Self::NotVerified
                | Self::Unverified
                | Self::Rejected
        )
    }

    pub fn can_transition_to(&self, next: OtpStatus) -> bool {
        !self.is_terminal() && next != Self::Requested && next != *self
    }

    /// Map a provider delivery-report code for `channel`
    pub fn from_provider_code(channel: OtpChannel, code: i32) -> Option<Self> {
        match channel {
            OtpChannel::Sms => match code {
                0 => Some(Self::Requested),
                1 => Some(Self::Delivered),
                2 => Some(Self::Verified),
                3 => Some(Self::NotVerified),
                4 => Some(Self::Failed),
                5 => Some(Self::RequestError),
                6 => Some(Self::Rejected),
                7 => Some(Self::Undelivered),
                8 => Some(Self::NoDeliveryReport),
                9 => Some(Self::Blocked),
                _ => None,
            },
            OtpChannel::WhatsApp => match code {
                0 => Some(Self::Requested),
                1 => Some(Self::Sent),
                2 => Some(Self::Delivered),
                3 => Some(Self::Read),
                4 => Some(Self::Verified),
                5 => Some(Self::Unverified),
                6 => Some(Self::Failed),
                7 => Some(Self::RequestError),
                10 => Some(Self::TierLimitExceeded),
                _ => None,
            },
            OtpChannel::Email => None,
        }
    }
}

impl std::fmt::Display for OtpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OtpStatus {
    type Err = crate::error::AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::error::AuthError::Internal(format!("unknown OTP status '{}'", s)))
    }
}
