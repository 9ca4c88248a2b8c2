//! Request Authenticator
//!
//! Runs the per-request validators concurrently and decides accept/reject:
//! - Mandatory-Header Validator
//! - Signature Validator
//! - Token Service (bearer token, revocation, role allow-list)
//! - Nonce Guard, when enabled in the pipeline
//!
//! Every validator runs to completion against its own inputs. When more than
//! one fails, the failure that completed first is reported. An access log
//! entry is emitted for every decision.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::GuardConfig;
use crate::context::RequestContext;
use crate::error::{AuthError, AuthResult};
use crate::headers::validate_mandatory;
use crate::nonce::NonceGuard;
use crate::signature::verify_signature;
use crate::token::TokenService;
use crate::types::AuthenticatedSubject;

/// Discriminated reason a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionKind {
    MissingHeader,
    BadSignature,
    Unauthenticated,
    ForbiddenRole,
    Replay,
    Internal,
}

impl From<&AuthError> for RejectionKind {
    fn from(error: &AuthError) -> Self {
        match error {
            AuthError::MissingHeader(_) | AuthError::MalformedHeader(_) => Self::MissingHeader,
            AuthError::BadSignature | AuthError::InvalidPayload(_) => Self::BadSignature,
            AuthError::MissingToken
            | AuthError::TokenMalformed
            | AuthError::TokenExpired
            | AuthError::TokenWrongAlgorithm
            | AuthError::TokenInvalidSignature
            | AuthError::TokenRevoked
            | AuthError::SubjectMismatch => Self::Unauthenticated,
            AuthError::ForbiddenRole => Self::ForbiddenRole,
            AuthError::ReplayDetected => Self::Replay,
            _ => Self::Internal,
        }
    }
}

/// Path list matching exactly, or by prefix for entries ending in `*`
#[derive(Debug, Clone, Default)]
pub struct PathRules {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl PathRules {
    pub fn new(entries: &[String]) -> Self {
        let mut rules = Self::default();
        for entry in entries {
            match entry.strip_suffix('*') {
                Some(prefix) => rules.prefixes.push(prefix.to_string()),
                None => rules.exact.push(entry.clone()),
            }
        }
        rules
    }

    pub fn matches(&self, path: &str) -> bool {
        self.exact.iter().any(|p| p == path) || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Which validators are skipped for which paths
#[derive(Debug, Clone, Default)]
pub struct Exemptions {
    pub authorization: PathRules,
    pub headers: PathRules,
    pub signature: PathRules,
    pub nonce: PathRules,
}

impl From<&GuardConfig> for Exemptions {
    fn from(config: &GuardConfig) -> Self {
        Self {
            authorization: PathRules::new(&config.exempt_authorization),
            headers: PathRules::new(&config.exempt_headers),
            signature: PathRules::new(&config.exempt_signature),
            nonce: PathRules::new(&config.exempt_nonce),
        }
    }
}

type Check<'a> = BoxFuture<'a, AuthResult<Option<AuthenticatedSubject>>>;

/// Accept/reject decision for inbound requests
#[derive(Clone)]
pub struct RequestAuthenticator {
    tokens: Arc<TokenService>,
    nonce: NonceGuard,
    exemptions: Exemptions,
    role_allow_list: HashMap<String, Vec<String>>,
    nonce_in_pipeline: bool,
}

impl RequestAuthenticator {
    pub fn new(tokens: Arc<TokenService>, nonce: NonceGuard, guard: &GuardConfig) -> Self {
        Self {
            tokens,
            nonce,
            exemptions: Exemptions::from(guard),
            role_allow_list: guard.role_allow_list.clone(),
            nonce_in_pipeline: guard.nonce_in_pipeline,
        }
    }

    /// Validate one request. The outcome and any authenticated identity are
    /// recorded on `ctx` and the access log entry is emitted before returning.
    pub async fn authenticate(&self, ctx: &mut RequestContext, body: &[u8]) -> AuthResult<()> {
        let outcome = self.run_checks(ctx, body).await;

        match &outcome {
            Ok(subject) => {
                if let Some(subject) = subject.clone() {
                    ctx.set_subject(subject);
                }
                ctx.succeed();
            }
            Err(error) => {
                if error.is_server_error() {
                    tracing::error!(request_id = %ctx.request_id, error = %error, "request validation failed");
                } else {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        kind = ?RejectionKind::from(error),
                        error = %error,
                        "request rejected"
                    );
                }
                ctx.fail(error);
            }
        }
        ctx.emit_access_log();

        outcome.map(|_| ())
    }

    /// Run the nonce guard on its own, for routes that want it outside the
    /// concurrent group.
    pub async fn check_nonce(&self, ctx: &RequestContext) -> AuthResult<()> {
        if self.exemptions.nonce.matches(&ctx.path) {
            return Ok(());
        }
        self.nonce.check(&ctx.headers.nonce).await
    }

    /// Allow-listed roles for `path`, if the path is restricted
    pub fn allowed_roles(&self, path: &str) -> Option<&[String]> {
        if let Some(roles) = self.role_allow_list.get(path) {
            return Some(roles.as_slice());
        }
        self.role_allow_list
            .iter()
            .find(|(pattern, _)| {
                pattern
                    .strip_suffix('*')
                    .map(|prefix| path.starts_with(prefix))
                    .unwrap_or(false)
            })
            .map(|(_, roles)| roles.as_slice())
    }

    async fn run_checks(
        &self,
        ctx: &RequestContext,
        body: &[u8],
    ) -> AuthResult<Option<AuthenticatedSubject>> {
        let path = ctx.path.as_str();
        let headers = &ctx.headers;
        let mut checks: FuturesUnordered<Check<'_>> = FuturesUnordered::new();

        if !self.exemptions.headers.matches(path) {
            checks.push(async move { validate_mandatory(headers).map(|_| None) }.boxed());
        }
        if !self.exemptions.signature.matches(path) {
            checks.push(async move { verify_signature(headers, body).map(|_| None) }.boxed());
        }
        if !self.exemptions.authorization.matches(path) {
            let roles = self.allowed_roles(path);
            checks.push(
                async move {
                    self.tokens
                        .authenticate_request(headers.authorization.as_deref(), roles)
                        .await
                        .map(Some)
                }
                .boxed(),
            );
        }
        if self.nonce_in_pipeline && !self.exemptions.nonce.matches(path) {
            checks.push(async move { self.nonce.check(&headers.nonce).await.map(|_| None) }.boxed());
        }

        let mut first_failure = None;
        let mut subject = None;
        while let Some(result) = checks.next().await {
            match result {
                Ok(Some(found)) => subject = Some(found),
                Ok(None) => {}
                Err(error) => {
                    if first_failure.is_none() {
                        first_failure = Some(error);
                    }
                }
            }
        }

        match first_failure {
            Some(error) => Err(error),
            None => Ok(subject),
        }
    }
}
