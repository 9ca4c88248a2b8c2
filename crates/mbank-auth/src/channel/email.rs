//! Email OTP delivery
//!
//! Renders the verification message and hands it to an injected [`Mailer`].
//! The verify key doubles as the session id since no provider is involved.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{ChannelAdapter, DispatchRequest, Dispatched};
use crate::config::EmailConfig;
use crate::error::{AuthError, AuthResult};
use crate::types::OtpChannel;

/// Outbound mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, to: &[String], subject: &str, body: &str) -> AuthResult<()>;
}

/// Email channel adapter
#[derive(Clone)]
pub struct EmailChannel {
    mailer: Arc<dyn Mailer>,
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(mailer: Arc<dyn Mailer>, config: EmailConfig) -> Self {
        Self { mailer, config }
    }

    /// Plain-text body of the verification email
    pub fn render(&self, code: &str, valid_for: Duration) -> String {
        format!(
            "Hello,\n\n\
             We received a request to verify your account. Please use the following code to proceed:\n\n\
             \u{1F511} Your OTP Code: {}\n\n\
             This code is valid for {} seconds. Do not share this code with anyone to keep your account secure.\n\n\
             If you did not request this code, please ignore this email.\n\n\
             Best regards,\n{}",
            code,
            valid_for.as_secs(),
            self.config.signature
        )
    }
}

#[async_trait]
impl ChannelAdapter for EmailChannel {
    fn channel(&self) -> OtpChannel {
        OtpChannel::Email
    }

    async fn send(&self, request: &DispatchRequest) -> AuthResult<Dispatched> {
        let code = request
            .code
            .clone()
            .ok_or_else(|| AuthError::Internal("email OTP dispatched without a code".to_string()))?;

        let body = self.render(&code, request.time_limit);
        self.mailer
            .send_mail(&[request.destination.clone()], &self.config.subject, &body)
            .await?;

        tracing::debug!(verify_key = %request.verify_key, "OTP email handed to mailer");
        Ok(Dispatched {
            delivered_code: code,
            session_id: request.verify_key.clone(),
        })
    }
}
