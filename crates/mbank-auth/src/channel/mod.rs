//! OTP delivery channels
//!
//! The OTP manager never branches on the delivery method itself. It looks the
//! record's channel up in a [`ChannelSet`] and talks to whichever
//! [`ChannelAdapter`] is registered for it. Channels whose codes live with a
//! third party also need an [`IdentityVerifier`] at verification time.

pub mod email;
pub mod verihubs;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AuthError, AuthResult};
use crate::types::OtpChannel;

pub use email::{EmailChannel, Mailer};
pub use verihubs::{SmsChannel, VerihubsClient, WhatsAppChannel};

/// What a channel is asked to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    /// Email address or MSISDN
    pub destination: String,
    /// Locally drawn code; `None` asks the provider to draw one
    pub code: Option<String>,
    /// How long the code stays valid
    pub time_limit: Duration,
    /// Verify key of the OTP being dispatched
    pub verify_key: String,
}

/// What a channel reports back after a successful send
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// The code the user actually received
    pub delivered_code: String,
    /// Provider session id, used to match delivery reports
    pub session_id: String,
}

/// Uniform interface over email, SMS and WhatsApp delivery
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> OtpChannel;

    /// Whether the provider draws the code itself
    fn generates_code(&self) -> bool {
        false
    }

    async fn send(&self, request: &DispatchRequest) -> AuthResult<Dispatched>;
}

/// Verification half of a third-party OTP provider
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, channel: OtpChannel, destination: &str, code: &str) -> AuthResult<()>;
}

/// Closed set of adapters keyed by channel
#[derive(Clone, Default)]
pub struct ChannelSet {
    adapters: HashMap<OtpChannel, Arc<dyn ChannelAdapter>>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under the channel it reports
    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn get(&self, channel: OtpChannel) -> AuthResult<&Arc<dyn ChannelAdapter>> {
        self.adapters
            .get(&channel)
            .ok_or_else(|| AuthError::Config(format!("no adapter registered for {}", channel)))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingChannel;
    use super::*;

    #[test]
    fn test_channel_set_lookup() {
        let set = ChannelSet::new()
            .with(Arc::new(RecordingChannel::new(OtpChannel::Email)))
            .with(Arc::new(RecordingChannel::new(OtpChannel::Sms)));

        assert_eq!(set.get(OtpChannel::Sms).unwrap().channel(), OtpChannel::Sms);
        assert_eq!(set.get(OtpChannel::Email).unwrap().channel(), OtpChannel::Email);
        assert!(matches!(set.get(OtpChannel::WhatsApp), Err(AuthError::Config(_))));
    }
}
