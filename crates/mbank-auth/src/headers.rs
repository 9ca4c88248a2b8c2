//! Mandatory-Header Validator
//!
//! Structural checks on the metadata every mobile client must send, plus
//! extraction of that metadata into a [`RequestHeaders`] snapshot the other
//! validators and the access log read from.

use chrono::DateTime;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::{AuthError, AuthResult};

/// Reported name for the client address, which may come from several
/// headers or the socket peer
const CLIENT_IP_LABEL: &str = "client IP";

/// Header names consumed by the authenticator
pub mod names {
    pub const X_NONCE: &str = "X-NONCE";
    pub const X_SIGNATURE: &str = "X-SIGNATURE";
    pub const X_TIMESTAMP: &str = "X-TIMESTAMP";
    pub const X_DEVICE_ID: &str = "X-DEVICE-ID";
    pub const X_LATITUDE: &str = "X-LATITUDE";
    pub const X_LONGITUDE: &str = "X-LONGITUDE";
    pub const USER_AGENT: &str = "User-Agent";
    pub const CF_CONNECTING_IP: &str = "CF-Connecting-IP";
    pub const X_REAL_IP: &str = "X-Real-IP";
    pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";
    pub const X_REQUEST_ID: &str = "X-Request-Id";
}

/// Device metadata recorded with every request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMeta {
    pub device_id: String,
    pub latitude: String,
    pub longitude: String,
    pub ip: String,
}

/// Snapshot of the headers the pipeline cares about. Absent headers are
/// empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestHeaders {
    pub content_type: String,
    pub user_agent: String,
    pub timestamp: String,
    pub signature: String,
    pub nonce: String,
    pub device_id: String,
    pub latitude: String,
    pub longitude: String,
    pub authorization: Option<String>,
    pub client_ip: String,
}

impl RequestHeaders {
    /// Capture headers from an inbound request
    pub fn from_headers(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        let get = |name: &str| header_str(headers, name).unwrap_or_default().to_string();

        Self {
            content_type: get(http::header::CONTENT_TYPE.as_str()),
            user_agent: get(names::USER_AGENT),
            timestamp: get(names::X_TIMESTAMP),
            signature: get(names::X_SIGNATURE),
            nonce: get(names::X_NONCE),
            device_id: get(names::X_DEVICE_ID),
            latitude: get(names::X_LATITUDE),
            longitude: get(names::X_LONGITUDE),
            authorization: header_str(headers, http::header::AUTHORIZATION.as_str()).map(str::to_string),
            client_ip: client_ip(headers, peer).unwrap_or_default(),
        }
    }

    pub fn device(&self) -> DeviceMeta {
        DeviceMeta {
            device_id: self.device_id.clone(),
            latitude: self.latitude.clone(),
            longitude: self.longitude.clone(),
            ip: self.client_ip.clone(),
        }
    }

    /// Whether the declared media type is JSON
    pub fn is_json(&self) -> bool {
        self.content_type
            .split(';')
            .next()
            .map(|media| media.trim().eq_ignore_ascii_case("application/json"))
            .unwrap_or(false)
    }
}

/// Validate the mandatory headers.
///
/// All absent headers are reported together (`"X-NONCE, X-DEVICE-ID is
/// required"`); format problems are only reported once nothing is missing.
pub fn validate_mandatory(headers: &RequestHeaders) -> AuthResult<()> {
    let required = [
        (names::USER_AGENT, &headers.user_agent),
        (names::X_TIMESTAMP, &headers.timestamp),
        (names::X_SIGNATURE, &headers.signature),
        (CLIENT_IP_LABEL, &headers.client_ip),
        (names::X_NONCE, &headers.nonce),
        (names::X_DEVICE_ID, &headers.device_id),
        (names::X_LATITUDE, &headers.latitude),
        (names::X_LONGITUDE, &headers.longitude),
    ];

    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(AuthError::MissingHeader(missing.join(", ")));
    }

    let mut malformed = Vec::new();
    if DateTime::parse_from_rfc3339(headers.timestamp.trim()).is_err() {
        malformed.push(names::X_TIMESTAMP);
    }
    if !is_coordinate(&headers.latitude, 90.0) {
        malformed.push(names::X_LATITUDE);
    }
    if !is_coordinate(&headers.longitude, 180.0) {
        malformed.push(names::X_LONGITUDE);
    }
    if !malformed.is_empty() {
        return Err(AuthError::MalformedHeader(malformed.join(", ")));
    }

    Ok(())
}

/// Resolve the real client IP.
///
/// Precedence: `CF-Connecting-IP`, `X-Real-IP`, the first hop of
/// `X-Forwarded-For`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    let parsed = |value: &str| value.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string());

    header_str(headers, names::CF_CONNECTING_IP)
        .and_then(parsed)
        .or_else(|| header_str(headers, names::X_REAL_IP).and_then(parsed))
        .or_else(|| {
            header_str(headers, names::X_FORWARDED_FOR)
                .and_then(|chain| chain.split(',').next())
                .and_then(parsed)
        })
        .or_else(|| peer.map(|ip| ip.to_string()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn is_coordinate(value: &str, bound: f64) -> bool {
    value
        .trim()
        .parse::<f64>()
        .map(|v| v.is_finite() && v.abs() <= bound)
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use http::HeaderValue;

    pub(crate) fn complete_headers() -> RequestHeaders {
        RequestHeaders {
            content_type: "application/json".to_string(),
            user_agent: "mbank-android/5.2.0".to_string(),
            timestamp: "2024-06-10T08:15:00+07:00".to_string(),
            signature: "deadbeef".to_string(),
            nonce: "1718000000".to_string(),
            device_id: "device-123".to_string(),
            latitude: "-6.2088".to_string(),
            longitude: "106.8456".to_string(),
            authorization: None,
            client_ip: "203.0.113.7".to_string(),
        }
    }

    #[test]
    fn test_complete_headers_pass() {
        assert!(validate_mandatory(&complete_headers()).is_ok());
    }

    #[test]
    fn test_missing_headers_listed_together() {
        let mut headers = complete_headers();
        headers.nonce.clear();
        headers.device_id.clear();

        let err = validate_mandatory(&headers).unwrap_err();
        assert_eq!(err.to_string(), "X-NONCE, X-DEVICE-ID is required");
        assert_eq!(err.error_code(), "MISSING_HEADER");
    }

    #[test]
    fn test_missing_client_ip_named_once() {
        let mut headers = complete_headers();
        headers.client_ip.clear();

        let err = validate_mandatory(&headers).unwrap_err();
        assert_eq!(err.to_string(), "client IP is required");
    }

    #[test]
    fn test_no_ip_header_means_missing_client_ip() {
        let mut map = HeaderMap::new();
        map.insert(names::USER_AGENT, HeaderValue::from_static("mbank-ios/5.2.0"));
        map.insert(names::X_TIMESTAMP, HeaderValue::from_static("2024-06-10T08:15:00+07:00"));
        map.insert(names::X_SIGNATURE, HeaderValue::from_static("deadbeef"));
        map.insert(names::X_NONCE, HeaderValue::from_static("n-1"));
        map.insert(names::X_DEVICE_ID, HeaderValue::from_static("device-123"));
        map.insert(names::X_LATITUDE, HeaderValue::from_static("-6.2"));
        map.insert(names::X_LONGITUDE, HeaderValue::from_static("106.8"));

        let err = validate_mandatory(&RequestHeaders::from_headers(&map, None)).unwrap_err();
        assert_eq!(err.to_string(), "client IP is required");

        map.insert(names::X_REAL_IP, HeaderValue::from_static("198.51.100.5"));
        assert!(validate_mandatory(&RequestHeaders::from_headers(&map, None)).is_ok());
    }

    #[test]
    fn test_wrong_timestamp_format() {
        let mut headers = complete_headers();
        headers.timestamp = "10/06/2024 08:15".to_string();

        let err = validate_mandatory(&headers).unwrap_err();
        assert_eq!(err.to_string(), "X-TIMESTAMP is wrong format");
    }

    #[test]
    fn test_coordinates_must_be_decimal() {
        let mut headers = complete_headers();
        headers.latitude = "north".to_string();
        headers.longitude = "200.5".to_string();

        let err = validate_mandatory(&headers).unwrap_err();
        assert_eq!(err.to_string(), "X-LATITUDE, X-LONGITUDE is wrong format");
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("10.0.0.1"));

        headers.insert("X-Forwarded-For", HeaderValue::from_static("198.51.100.4, 10.0.0.9"));
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("198.51.100.4"));

        headers.insert("X-Real-IP", HeaderValue::from_static("198.51.100.5"));
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("198.51.100.5"));

        headers.insert("CF-Connecting-IP", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("203.0.113.9"));

        headers.insert("CF-Connecting-IP", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("198.51.100.5"));
    }

    #[test]
    fn test_from_headers_snapshot() {
        let mut map = HeaderMap::new();
        map.insert("x-nonce", HeaderValue::from_static("n-1"));
        map.insert("content-type", HeaderValue::from_static("application/json; charset=utf-8"));
        map.insert("authorization", HeaderValue::from_static("Bearer abc"));

        let headers = RequestHeaders::from_headers(&map, None);
        assert_eq!(headers.nonce, "n-1");
        assert!(headers.is_json());
        assert_eq!(headers.authorization.as_deref(), Some("Bearer abc"));
        assert!(headers.client_ip.is_empty());
    }
}
