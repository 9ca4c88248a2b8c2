//! HTTP surface
//!
//! A thin router over [`AuthService`]. Every route runs behind the auth
//! layer; which checks apply to which path comes from the guard config.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use mbank_auth::token::bearer_token;
use mbank_auth::{
    AccessType, AuthError, AuthResult, AuthService, Ctx, OtpChannel, OtpPurpose, OtpStatus,
    RequireSubject, Role, Subject, TokenPair,
};
use mbank_db::Database;

use crate::config::ServerSettings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    /// Absent when running against in-memory stores
    pub db: Option<Arc<Database>>,
}

/// Build the application router
pub fn create_router(state: AppState, settings: &ServerSettings) -> Router {
    let auth_layer = state.auth.layer().with_body_limit(settings.max_body_size);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/v1/otp/request", post(request_otp))
        .route("/v1/otp/verify", post(verify_otp))
        .route("/v1/token/refresh", post(refresh_token))
        .route("/v1/logout", post(logout))
        .route("/v1/grants/consume", post(consume_grant))
        .route("/v1/webhooks/verihubs/:channel", post(delivery_report))
        .with_state(state)
        .layer(auth_layer)
        .layer(TraceLayer::new_for_http());

    if settings.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<bool>,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let Some(db) = state.db else {
        return (
            StatusCode::OK,
            Json(HealthResponse { status: "healthy", version, postgres: None, redis: None }),
        );
    };

    let health = db.health_check().await;
    let (code, status) = if health.healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status,
            version,
            postgres: Some(health.postgres),
            redis: Some(health.redis),
        }),
    )
}

// =============================================================================
// OTP
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OtpRequestBody {
    pub purpose: OtpPurpose,
    pub channel: OtpChannel,
    pub destination: String,
    pub user_id: i64,
    pub user_uuid: Uuid,
    #[serde(default)]
    pub username: String,
}

/// The code itself never leaves the server
#[derive(Debug, Serialize)]
pub struct OtpRequestResponse {
    pub verify_key: String,
    pub channel: OtpChannel,
    pub status: OtpStatus,
    pub expires_at: DateTime<Utc>,
}

async fn request_otp(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Json(body): Json<OtpRequestBody>,
) -> AuthResult<Json<OtpRequestResponse>> {
    // The route is open for registration, but a caller presenting a token
    // may only request codes for themselves
    let caller = match (&ctx.subject, ctx.headers.authorization.as_deref()) {
        (Some(known), _) => Some(known.clone()),
        (None, Some(authorization)) => Some(
            state
                .auth
                .tokens
                .authenticate_request(Some(authorization), None)
                .await?,
        ),
        (None, None) => None,
    };
    let role = match caller {
        Some(known) if known.uuid != body.user_uuid => return Err(AuthError::SubjectMismatch),
        Some(known) => known.role,
        None => Role::default(),
    };
    let subject = Subject {
        id: body.user_id,
        uuid: body.user_uuid,
        username: body.username,
        role,
    };

    let issued = state
        .auth
        .request_otp(&ctx, &subject, body.purpose, body.channel, &body.destination)
        .await?;

    Ok(Json(OtpRequestResponse {
        verify_key: issued.verify_key,
        channel: issued.record.channel,
        status: issued.record.status,
        expires_at: issued.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OtpVerifyBody {
    pub code: String,
    pub verify_key: String,
}

#[derive(Debug, Serialize)]
pub struct OtpVerifyResponse {
    pub status: OtpStatus,
    pub access_type: AccessType,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

async fn verify_otp(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Json(body): Json<OtpVerifyBody>,
) -> AuthResult<Json<OtpVerifyResponse>> {
    let device_id = ctx.device().device_id.clone();
    let (record, grant) = state
        .auth
        .verify_otp(&ctx, &body.code, &body.verify_key, &device_id)
        .await?;

    Ok(Json(OtpVerifyResponse {
        status: record.status,
        access_type: grant.access_type,
        access_token: grant.access_token,
        expires_at: grant.expires_at,
    }))
}

// =============================================================================
// Tokens
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub refresh_token: String,
    pub user_uuid: Uuid,
}

async fn refresh_token(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Json(body): Json<RefreshBody>,
) -> AuthResult<Json<TokenPair>> {
    let pair = state.auth.refresh(&ctx, &body.refresh_token, body.user_uuid).await?;
    Ok(Json(pair))
}

#[derive(Debug, Deserialize)]
pub struct LogoutBody {
    pub refresh_token: String,
}

async fn logout(
    State(state): State<AppState>,
    RequireSubject(_subject): RequireSubject,
    Ctx(ctx): Ctx,
    Json(body): Json<LogoutBody>,
) -> AuthResult<StatusCode> {
    let access_token = bearer_token(ctx.headers.authorization.as_deref())
        .ok_or(AuthError::MissingToken)?
        .to_string();
    state.auth.logout(&ctx, &access_token, &body.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Access grants
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ConsumeGrantBody {
    pub access_token: String,
    pub access_type: AccessType,
}

#[derive(Debug, Serialize)]
pub struct ConsumeGrantResponse {
    pub access_type: AccessType,
    pub user_uuid: Uuid,
    pub device_id: String,
}

async fn consume_grant(
    State(state): State<AppState>,
    Json(body): Json<ConsumeGrantBody>,
) -> AuthResult<Json<ConsumeGrantResponse>> {
    let grant = state
        .auth
        .consume_grant(&body.access_token, body.access_type)
        .await?;
    Ok(Json(ConsumeGrantResponse {
        access_type: grant.access_type,
        user_uuid: grant.user_uuid,
        device_id: grant.device_id,
    }))
}

// =============================================================================
// Provider delivery reports
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DeliveryReport {
    pub session_id: String,
    /// Provider status code, channel specific
    pub status: i32,
}

#[derive(Debug, Serialize)]
pub struct DeliveryReportResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OtpStatus>,
}

async fn delivery_report(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(report): Json<DeliveryReport>,
) -> AuthResult<Json<DeliveryReportResponse>> {
    let channel: OtpChannel = match channel.to_ascii_uppercase().parse() {
        Ok(OtpChannel::Email) | Err(_) => return Err(AuthError::NotFound(format!("channel {}", channel))),
        Ok(channel) => channel,
    };

    let updated = state
        .auth
        .otp
        .apply_delivery_report(&report.session_id, channel, report.status)
        .await?;

    Ok(Json(DeliveryReportResponse {
        applied: updated.is_some(),
        status: updated.map(|record| record.status),
    }))
}
