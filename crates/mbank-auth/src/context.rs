//! Request-scoped context
//!
//! Everything the pipeline learns about one request travels in a
//! [`RequestContext`] passed explicitly through the call chain and handed to
//! handlers through request extensions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::headers::{DeviceMeta, RequestHeaders};
use crate::types::AuthenticatedSubject;

/// Target of the per-request access log events
pub const ACCESS_LOG_TARGET: &str = "access_log";

/// Per-request state
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
    pub path: String,
    pub method: String,
    pub headers: RequestHeaders,
    /// Set once the access token has been verified
    pub subject: Option<AuthenticatedSubject>,
    pub log: AccessLogEntry,
}

impl RequestContext {
    /// Start a context. A missing request id gets a fresh UUID.
    pub fn new(
        request_id: Option<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        headers: RequestHeaders,
    ) -> Self {
        let request_id = request_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let path = path.into();
        let method = method.into();

        let log = AccessLogEntry {
            request_id: request_id.clone(),
            timestamp: headers.timestamp.clone(),
            url: path.clone(),
            method: method.clone(),
            device: headers.device(),
            remarks: path.clone(),
            ..AccessLogEntry::default()
        };

        Self {
            request_id,
            received_at: Utc::now(),
            path,
            method,
            headers,
            subject: None,
            log,
        }
    }

    pub fn device(&self) -> &DeviceMeta {
        &self.log.device
    }

    pub fn client_ip(&self) -> &str {
        &self.headers.client_ip
    }

    /// Record the authenticated identity on the context and its log entry
    pub fn set_subject(&mut self, subject: AuthenticatedSubject) {
        self.log.user_uuid = subject.uuid.to_string();
        self.log.username = subject.username.clone();
        self.subject = Some(subject);
    }

    pub fn succeed(&mut self) {
        self.log.success = true;
        self.log.error.clear();
    }

    pub fn fail(&mut self, error: &AuthError) {
        self.log.success = false;
        self.log.error = error.to_string();
    }

    /// Emit the access log entry. Called exactly once per request.
    pub fn emit_access_log(&self) {
        let entry = match serde_json::to_string(&self.log) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize access log entry");
                return;
            }
        };
        if self.log.success {
            tracing::info!(target: ACCESS_LOG_TARGET, request_id = %self.request_id, "{}", entry);
        } else {
            tracing::warn!(target: ACCESS_LOG_TARGET, request_id = %self.request_id, "{}", entry);
        }
    }
}

/// One line of the access log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub request_id: String,
    /// Client-supplied `X-TIMESTAMP`
    pub timestamp: String,
    #[serde(rename = "path")]
    pub url: String,
    pub method: String,
    pub device: DeviceMeta,
    pub success: bool,
    pub error: String,
    pub user_uuid: String,
    pub username: String,
    pub remarks: String,
}
