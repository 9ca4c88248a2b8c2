//! SMS and WhatsApp OTP delivery through the Verihubs API
//!
//! Send endpoints answer `201 Created`, verify endpoints `200 OK`. Every
//! request carries `App-ID` and `API-Key`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{ChannelAdapter, DispatchRequest, Dispatched, IdentityVerifier};
use crate::config::VerihubsConfig;
use crate::error::{AuthError, AuthResult};
use crate::types::OtpChannel;

const SMS_SEND: &str = "/v2/otp/send";
const SMS_VERIFY: &str = "/v2/otp/verify";
const WHATSAPP_SEND: &str = "/v1/whatsapp/otp/send";
const WHATSAPP_VERIFY: &str = "/v1/whatsapp/otp/verify";

const HEADER_APP_ID: &str = "App-ID";
const HEADER_API_KEY: &str = "API-Key";

/// Longest provider error body kept in an error message
const MAX_ERROR_BODY: usize = 256;

/// Body of `POST /v2/otp/send`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSmsOtpRequest {
    pub msisdn: String,
    pub otp: Option<String>,
    pub template: Option<String>,
    pub time_limit: i64,
    pub challenge: Option<String>,
    pub callback_url: Option<String>,
}

/// Body of `POST /v1/whatsapp/otp/send`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendWhatsAppOtpRequest {
    pub msisdn: String,
    pub otp: Option<String>,
    pub challenge: Option<String>,
    pub time_limit: i64,
    pub lang_code: String,
    pub template_name: String,
    pub otp_length: Option<String>,
    pub callback_url: Option<String>,
}

/// Body of both verify endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub msisdn: String,
    pub otp: String,
    pub challenge: Option<String>,
}

/// Answer from both send endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SendOtpResponse {
    pub message: String,
    pub otp: String,
    pub msisdn: String,
    pub session_id: String,
    /// SMS only
    pub segment_count: Option<i64>,
    /// WhatsApp only
    pub try_count: Option<i64>,
}

/// HTTP client for the Verihubs OTP API
#[derive(Clone)]
pub struct VerihubsClient {
    http: reqwest::Client,
    config: VerihubsConfig,
}

impl VerihubsClient {
    pub fn new(config: VerihubsConfig, timeout: Duration) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("verihubs client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &VerihubsConfig {
        &self.config
    }

    pub async fn send_sms(&self, request: &SendSmsOtpRequest) -> AuthResult<SendOtpResponse> {
        self.post(SMS_SEND, request, StatusCode::CREATED).await
    }

    pub async fn send_whatsapp(&self, request: &SendWhatsAppOtpRequest) -> AuthResult<SendOtpResponse> {
        self.post(WHATSAPP_SEND, request, StatusCode::CREATED).await
    }

    pub async fn verify_sms(&self, msisdn: &str, otp: &str) -> AuthResult<()> {
        self.verify_at(SMS_VERIFY, msisdn, otp).await
    }

    pub async fn verify_whatsapp(&self, msisdn: &str, otp: &str) -> AuthResult<()> {
        self.verify_at(WHATSAPP_VERIFY, msisdn, otp).await
    }

    async fn verify_at(&self, path: &str, msisdn: &str, otp: &str) -> AuthResult<()> {
        let body = VerifyOtpRequest {
            msisdn: msisdn.to_string(),
            otp: otp.to_string(),
            challenge: None,
        };
        let _: serde_json::Value = self.post(path, &body, StatusCode::OK).await?;
        Ok(())
    }

    async fn post<B, R>(&self, path: &str, body: &B, expected: StatusCode) -> AuthResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(HEADER_APP_ID, &self.config.app_id)
            .header(HEADER_API_KEY, &self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status != expected {
            let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
            tracing::warn!(path, status = status.as_u16(), body = %snippet, "verihubs call failed");
            return Err(AuthError::Upstream(format!("{} returned {}: {}", path, status, snippet)));
        }

        if text.trim().is_empty() {
            return serde_json::from_str("{}")
                .map_err(|e| AuthError::Upstream(format!("{}: {}", path, e)));
        }
        serde_json::from_str(&text).map_err(|e| AuthError::Upstream(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl IdentityVerifier for VerihubsClient {
    async fn verify(&self, channel: OtpChannel, destination: &str, code: &str) -> AuthResult<()> {
        match channel {
            OtpChannel::Sms => self.verify_sms(destination, code).await,
            OtpChannel::WhatsApp => self.verify_whatsapp(destination, code).await,
            OtpChannel::Email => Ok(()),
        }
    }
}

fn time_limit(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// SMS channel adapter
#[derive(Clone)]
pub struct SmsChannel {
    client: Arc<VerihubsClient>,
}

impl SmsChannel {
    pub fn new(client: Arc<VerihubsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelAdapter for SmsChannel {
    fn channel(&self) -> OtpChannel {
        OtpChannel::Sms
    }

    fn generates_code(&self) -> bool {
        self.client.config.provider_generates_code
    }

    async fn send(&self, request: &DispatchRequest) -> AuthResult<Dispatched> {
        let config = &self.client.config;
        let response = self
            .client
            .send_sms(&SendSmsOtpRequest {
                msisdn: request.destination.clone(),
                otp: request.code.clone(),
                template: config.sms_template.clone(),
                time_limit: time_limit(request.time_limit),
                challenge: config.sms_challenge.clone(),
                callback_url: config.callback_url.clone(),
            })
            .await?;

        Ok(Dispatched {
            delivered_code: response.otp,
            session_id: response.session_id,
        })
    }
}

/// WhatsApp channel adapter
#[derive(Clone)]
pub struct WhatsAppChannel {
    client: Arc<VerihubsClient>,
}

impl WhatsAppChannel {
    pub fn new(client: Arc<VerihubsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppChannel {
    fn channel(&self) -> OtpChannel {
        OtpChannel::WhatsApp
    }

    fn generates_code(&self) -> bool {
        self.client.config.provider_generates_code
    }

    async fn send(&self, request: &DispatchRequest) -> AuthResult<Dispatched> {
        let config = &self.client.config;
        let response = self
            .client
            .send_whatsapp(&SendWhatsAppOtpRequest {
                msisdn: request.destination.clone(),
                otp: request.code.clone(),
                challenge: None,
                time_limit: time_limit(request.time_limit),
                lang_code: config.whatsapp_lang_code.clone(),
                template_name: config.whatsapp_template.clone(),
                otp_length: config.whatsapp_otp_length.clone(),
                callback_url: config.callback_url.clone(),
            })
            .await?;

        Ok(Dispatched {
            delivered_code: response.otp,
            session_id: response.session_id,
        })
    }
}
