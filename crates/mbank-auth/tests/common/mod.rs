//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use parking_lot::Mutex;
use std::sync::Arc;

use mbank_auth::config::JwtConfig;
use mbank_auth::headers::{names, RequestHeaders};
use mbank_auth::signature::compute_signature;
use mbank_auth::{AuthConfig, AuthResult, AuthService, Mailer, Role, Subject};
use mbank_db::Stores;

/// Mailer that keeps every message in memory
#[derive(Default)]
pub struct Outbox {
    pub sent: Mutex<Vec<(Vec<String>, String, String)>>,
}

impl Outbox {
    /// The code from the most recent OTP email
    pub fn last_code(&self) -> Option<String> {
        let sent = self.sent.lock();
        let (_, _, body) = sent.last()?;
        let start = body.find("Your OTP Code: ")? + "Your OTP Code: ".len();
        Some(body[start..].chars().take_while(char::is_ascii_digit).collect())
    }
}

#[async_trait]
impl Mailer for Outbox {
    async fn send_mail(&self, to: &[String], subject: &str, body: &str) -> AuthResult<()> {
        self.sent
            .lock()
            .push((to.to_vec(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        access_private_key_pem: include_str!("../../testdata/access_private.pem").to_string(),
        access_public_key_pem: include_str!("../../testdata/access_public.pem").to_string(),
        refresh_private_key_pem: include_str!("../../testdata/refresh_private.pem").to_string(),
        refresh_public_key_pem: include_str!("../../testdata/refresh_public.pem").to_string(),
        ..JwtConfig::default()
    }
}

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig {
        jwt: jwt_config(),
        ..AuthConfig::default()
    };
    config.rate_limit.enabled = false;
    config
}

pub fn service(config: AuthConfig) -> (AuthService, Arc<Outbox>) {
    let outbox = Arc::new(Outbox::default());
    let service = AuthService::with_default_channels(config, Stores::in_memory(), outbox.clone())
        .expect("service wiring");
    (service, outbox)
}

pub fn subject() -> Subject {
    Subject {
        id: 7,
        uuid: uuid::Uuid::parse_str("6f1c1a52-5f9e-4c43-9d1c-2b7f0b8f5a10").unwrap(),
        username: "sari".to_string(),
        role: Role::User,
    }
}

/// Mandatory headers plus a valid signature for `body`
pub fn signed_headers(body: &[u8], bearer: Option<&str>) -> HeaderMap {
    let mut map = HeaderMap::new();
    let mut put = |name: &'static str, value: &str| {
        map.insert(name, HeaderValue::from_str(value).unwrap());
    };
    put("content-type", "application/json");
    put(names::USER_AGENT, "mbank-ios/5.2.0");
    put(names::X_TIMESTAMP, "2024-06-10T08:15:00+07:00");
    put(names::X_NONCE, &uuid::Uuid::new_v4().to_string());
    put(names::X_DEVICE_ID, "device-789");
    put(names::X_LATITUDE, "-6.2088");
    put(names::X_LONGITUDE, "106.8456");
    put(names::X_REAL_IP, "198.51.100.20");
    if let Some(token) = bearer {
        put("authorization", &format!("Bearer {}", token));
    }

    let signature = compute_signature(&RequestHeaders::from_headers(&map, None), body).unwrap();
    map.insert(names::X_SIGNATURE, HeaderValue::from_str(&signature).unwrap());
    map
}
