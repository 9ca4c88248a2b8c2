//! Signature Validator
//!
//! The client signs every request with a lower-case hex SHA-256 digest sent
//! in `X-SIGNATURE`:
//! - JSON bodies: digest of the body with insignificant whitespace removed
//! - anything else: digest of `"{X-TIMESTAMP}:{X-NONCE}:{X-DEVICE-ID}"`

use serde::de::IgnoredAny;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AuthError, AuthResult};
use crate::headers::RequestHeaders;

/// Check `X-SIGNATURE` against the recomputed digest
pub fn verify_signature(headers: &RequestHeaders, body: &[u8]) -> AuthResult<()> {
    let expected = compute_signature(headers, body)?;
    let supplied = headers.signature.as_bytes();

    if supplied.ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        tracing::debug!(device_id = %headers.device_id, "signature mismatch");
        Err(AuthError::BadSignature)
    }
}

/// Digest a request the way clients are expected to sign it
pub fn compute_signature(headers: &RequestHeaders, body: &[u8]) -> AuthResult<String> {
    if headers.is_json() {
        let compacted = compact_json(body)?;
        Ok(hex::encode(Sha256::digest(&compacted)))
    } else {
        let material = format!("{}:{}:{}", headers.timestamp, headers.nonce, headers.device_id);
        Ok(hex::encode(Sha256::digest(material.as_bytes())))
    }
}

/// Strip whitespace outside string literals, leaving every other byte
/// (key order, number spelling, escapes) exactly as sent.
pub fn compact_json(body: &[u8]) -> AuthResult<Vec<u8>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AuthError::InvalidPayload(
            "application/json but payload is empty".to_string(),
        ));
    }
    serde_json::from_slice::<IgnoredAny>(body)
        .map_err(|e| AuthError::InvalidPayload(e.to_string()))?;

    let mut out = Vec::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;

    for &byte in body {
        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(byte);
            }
            _ => out.push(byte),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::tests::complete_headers;

    fn signed(body: &[u8]) -> RequestHeaders {
        let mut headers = complete_headers();
        headers.signature = compute_signature(&headers, body).unwrap();
        headers
    }

    #[test]
    fn test_compact_preserves_strings_and_order() {
        let body = br#"{ "z" : 1,
            "a" : "two  words \" quoted ",  "n": [1, 2.50] }"#;
        let compacted = compact_json(body).unwrap();
        assert_eq!(
            String::from_utf8(compacted).unwrap(),
            r#"{"z":1,"a":"two  words \" quoted ","n":[1,2.50]}"#
        );
    }

    #[test]
    fn test_json_signature_ignores_formatting() {
        let pretty = b"{\n  \"amount\": 15000,\n  \"pin\": \"123456\"\n}";
        let compact = br#"{"amount":15000,"pin":"123456"}"#;

        let headers = signed(compact);
        assert!(verify_signature(&headers, pretty).is_ok());
        assert!(verify_signature(&headers, compact).is_ok());
    }

    #[test]
    fn test_single_bit_mutation_fails() {
        let body = br#"{"amount":15000,"recipient":"0812345678"}"#.to_vec();
        let headers = signed(&body);

        for index in 0..body.len() {
            for bit in 0..8 {
                let mut mutated = body.clone();
                mutated[index] ^= 1 << bit;
                match verify_signature(&headers, &mutated) {
                    Err(AuthError::BadSignature) | Err(AuthError::InvalidPayload(_)) => {}
                    other => panic!("mutation at {}:{} accepted: {:?}", index, bit, other),
                }
            }
        }
    }

    #[test]
    fn test_non_json_uses_header_material() {
        let mut headers = complete_headers();
        headers.content_type = "multipart/form-data; boundary=x".to_string();
        let material = format!("{}:{}:{}", headers.timestamp, headers.nonce, headers.device_id);
        headers.signature = hex::encode(Sha256::digest(material.as_bytes()));

        assert!(verify_signature(&headers, b"ignored body").is_ok());

        headers.nonce = "other".to_string();
        assert!(matches!(verify_signature(&headers, b""), Err(AuthError::BadSignature)));
    }

    #[test]
    fn test_empty_json_body_is_invalid_payload() {
        let headers = complete_headers();
        let err = verify_signature(&headers, b"").unwrap_err();
        assert!(matches!(err, AuthError::InvalidPayload(_)));
        assert_eq!(err.error_code(), "INVALID_PAYLOAD");

        assert!(matches!(
            verify_signature(&headers, b"not json"),
            Err(AuthError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_known_digest() {
        let headers = signed(b"{}");
        assert_eq!(
            headers.signature,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
