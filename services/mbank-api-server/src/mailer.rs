//! Log-only mail transport
//!
//! Stands in for an SMTP relay in deployments where outbound mail is handled
//! by a sidecar that tails the `mail` log target. Message bodies carry OTP
//! codes and are never logged.

use async_trait::async_trait;

use mbank_auth::{AuthResult, Mailer};

pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send_mail(&self, to: &[String], subject: &str, body: &str) -> AuthResult<()> {
        tracing::info!(
            target: "mail",
            recipients = to.len(),
            to = %to.join(","),
            subject,
            body_len = body.len(),
            "mail queued"
        );
        Ok(())
    }
}
