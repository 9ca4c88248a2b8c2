//! Authentication Middleware for Axum
//!
//! Tower layer that:
//! - Applies the injected rate limiter per client IP
//! - Buffers the body once so every validator sees the same bytes
//! - Runs the [`RequestAuthenticator`]
//! - Hands the [`RequestContext`] and authenticated subject to handlers

use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::authenticator::RequestAuthenticator;
use crate::context::RequestContext;
use crate::error::{AuthError, ErrorResponse};
use crate::headers::{names, RequestHeaders};
use crate::rate_limit::RateLimiter;
use crate::types::AuthenticatedSubject;

/// Largest body the layer will buffer
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Authentication middleware layer
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<RequestAuthenticator>,
    limiter: Option<RateLimiter>,
    body_limit: usize,
}

impl AuthLayer {
    /// Create a new authentication layer
    pub fn new(authenticator: Arc<RequestAuthenticator>) -> Self {
        Self {
            authenticator,
            limiter: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Rate-limit by client IP before any validation runs
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            authenticator: self.authenticator.clone(),
            limiter: self.limiter.clone(),
            body_limit: self.body_limit,
        }
    }
}

/// Authentication middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    authenticator: Arc<RequestAuthenticator>,
    limiter: Option<RateLimiter>,
    body_limit: usize,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let limiter = self.limiter.clone();
        let body_limit = self.body_limit;
        // Take the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let peer = parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip());
            let request_id = parts
                .headers
                .get(names::X_REQUEST_ID)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let headers = RequestHeaders::from_headers(&parts.headers, peer);
            let mut ctx = RequestContext::new(request_id, parts.method.as_str(), parts.uri.path(), headers);

            if let Some(limiter) = limiter {
                let key = match ctx.client_ip() {
                    "" => "unknown".to_string(),
                    ip => ip.to_string(),
                };
                if let Err(error) = limiter.check(&key).await {
                    ctx.fail(&error);
                    ctx.emit_access_log();
                    return Ok(auth_error_response(&error));
                }
            }

            let bytes = match axum::body::to_bytes(body, body_limit).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let error = AuthError::InvalidPayload(e.to_string());
                    ctx.fail(&error);
                    ctx.emit_access_log();
                    return Ok(auth_error_response(&error));
                }
            };

            if let Err(error) = authenticator.authenticate(&mut ctx, &bytes).await {
                return Ok(auth_error_response(&error));
            }

            if let Some(subject) = ctx.subject.clone() {
                parts.extensions.insert(subject);
            }
            parts.extensions.insert(ctx);
            inner.call(Request::from_parts(parts, Body::from(bytes))).await
        })
    }
}

/// Create error response for authentication errors
pub fn auth_error_response(error: &AuthError) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::from(error);

    let mut res = Response::builder()
        .status(status)
        .header("Content-Type", "application/json");

    // Add Retry-After header for rate limiting
    if let Some(retry_after) = body.retry_after {
        res = res.header("Retry-After", retry_after.to_string());
    }

    res.body(Body::from(serde_json::to_string(&body).unwrap_or_default()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        auth_error_response(&self)
    }
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extractor for the authenticated subject. Returns 401 if the request did
/// not carry a verified access token.
pub struct RequireSubject(pub AuthenticatedSubject);

#[async_trait]
impl<S> FromRequestParts<S> for RequireSubject
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedSubject>()
            .cloned()
            .map(RequireSubject)
            .ok_or_else(|| auth_error_response(&AuthError::MissingToken))
    }
}

/// Extractor for the request context built by [`AuthLayer`]
pub struct Ctx(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(Ctx)
            .ok_or_else(|| {
                auth_error_response(&AuthError::Internal("request context missing".to_string()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_response() {
        let response = auth_error_response(&AuthError::TokenRevoked);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = auth_error_response(&AuthError::ForbiddenRole);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = auth_error_response(&AuthError::RateLimitExceeded { retry_after: 12 });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["Retry-After"], "12");
    }

    #[tokio::test]
    async fn test_error_body_hides_internals() {
        let response = AuthError::Database("pool exhausted".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert_eq!(body.message, "Server busy, please try again later");
    }
}
