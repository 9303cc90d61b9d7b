//! Verification of identity-provider webhook signatures.
//!
//! Deliveries carry three headers: a message id, a unix timestamp and a
//! space-separated list of `version,signature` entries. A `v1` signature is
//! `base64(HMAC-SHA256(key, "{id}.{timestamp}.{body}"))` computed over the
//! body exactly as received, which is why the webhook route never parses
//! JSON before this check.

use axum::http::HeaderMap;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

/// Default accepted clock skew between the provider and this server.
pub const DEFAULT_TOLERANCE_SECS: u64 = 5 * 60;

/// Header names in lookup order: branded first, then the unbranded fallback.
pub const ID_HEADERS: [&str; 2] = ["svix-id", "webhook-id"];
pub const TIMESTAMP_HEADERS: [&str; 2] = ["svix-timestamp", "webhook-timestamp"];
pub const SIGNATURE_HEADERS: [&str; 2] = ["svix-signature", "webhook-signature"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    #[error("header {0} is not valid text")]
    InvalidHeader(&'static str),

    #[error("invalid signature timestamp")]
    InvalidTimestamp,

    #[error("message timestamp too old")]
    TimestampTooOld,

    #[error("message timestamp too new")]
    TimestampTooNew,

    #[error("no matching signature found")]
    NoMatchingSignature,

    #[error("webhook secret is not valid base64")]
    InvalidSecret,

    #[error("signed body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// The three signature headers of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookHeaders {
    pub msg_id: String,
    pub timestamp: String,
    pub signature: String,
}

impl WebhookHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Result<Self, VerificationError> {
        Ok(Self {
            msg_id: header_value(headers, &ID_HEADERS)?,
            timestamp: header_value(headers, &TIMESTAMP_HEADERS)?,
            signature: header_value(headers, &SIGNATURE_HEADERS)?,
        })
    }
}

fn header_value(
    headers: &HeaderMap,
    names: &[&'static str; 2],
) -> Result<String, VerificationError> {
    for name in names {
        if let Some(value) = headers.get(*name) {
            let text = value
                .to_str()
                .map_err(|_| VerificationError::InvalidHeader(*name))?;
            if text.trim().is_empty() {
                return Err(VerificationError::MissingHeader(*name));
            }
            return Ok(text.to_string());
        }
    }
    Err(VerificationError::MissingHeader(names[0]))
}

/// Decoded signing key. `Debug` never prints the key material.
#[derive(Clone)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    /// Parse a `whsec_<base64>` secret; the prefix is optional.
    pub fn parse(secret: &str) -> Result<Self, VerificationError> {
        let encoded = secret.trim();
        let encoded = encoded.strip_prefix(SECRET_PREFIX).unwrap_or(encoded);
        let key = BASE64
            .decode(encoded)
            .map_err(|_| VerificationError::InvalidSecret)?;
        if key.is_empty() {
            return Err(VerificationError::InvalidSecret);
        }
        Ok(Self(key))
    }

    pub fn from_bytes(key: impl Into<Vec<u8>>) -> Self {
        Self(key.into())
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `whsec_` form of this key.
    pub fn encode(&self) -> String {
        format!("{SECRET_PREFIX}{}", BASE64.encode(&self.0))
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(..)")
    }
}

/// Checks delivery signatures against one shared secret.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: WebhookSecret,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: WebhookSecret, tolerance_secs: u64) -> Self {
        Self {
            secret,
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    /// Verify `body` against the headers and decode it as JSON.
    pub fn verify(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<serde_json::Value, VerificationError> {
        self.verify_at(headers, body, chrono::Utc::now().timestamp())
    }

    /// [`verify`](Self::verify) with an explicit "now" in unix seconds.
    pub fn verify_at(
        &self,
        headers: &WebhookHeaders,
        body: &[u8],
        now: i64,
    ) -> Result<serde_json::Value, VerificationError> {
        let timestamp = headers
            .timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| VerificationError::InvalidTimestamp)?;

        if now.saturating_sub(timestamp) > self.tolerance_secs {
            return Err(VerificationError::TimestampTooOld);
        }
        if timestamp.saturating_sub(now) > self.tolerance_secs {
            return Err(VerificationError::TimestampTooNew);
        }

        let expected = self.compute(&headers.msg_id, timestamp, body)?;
        let matched = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .any(|(_, candidate)| constant_time_eq(candidate.as_bytes(), expected.as_bytes()));

        if !matched {
            return Err(VerificationError::NoMatchingSignature);
        }

        serde_json::from_slice(body).map_err(|e| VerificationError::InvalidJson(e.to_string()))
    }

    /// Produce a `v1,<signature>` header value for a delivery.
    pub fn sign(
        &self,
        msg_id: &str,
        timestamp: i64,
        body: &[u8],
    ) -> Result<String, VerificationError> {
        let signature = self.compute(msg_id, timestamp, body)?;
        Ok(format!("{SIGNATURE_VERSION},{signature}"))
    }

    fn compute(
        &self,
        msg_id: &str,
        timestamp: i64,
        body: &[u8],
    ) -> Result<String, VerificationError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret.0)
            .map_err(|_| VerificationError::InvalidSecret)?;
        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"type":"user.created","data":{"id":"user_1"}}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(
            WebhookSecret::from_bytes(b"test-signing-key".to_vec()),
            DEFAULT_TOLERANCE_SECS,
        )
    }

    fn signed_headers(verifier: &WebhookVerifier, timestamp: i64, body: &[u8]) -> WebhookHeaders {
        WebhookHeaders {
            msg_id: "msg_1".into(),
            timestamp: timestamp.to_string(),
            signature: verifier.sign("msg_1", timestamp, body).unwrap(),
        }
    }

    #[test]
    fn accepts_valid_signature() {
        let verifier = verifier();
        let headers = signed_headers(&verifier, NOW, BODY);
        let payload = verifier.verify_at(&headers, BODY, NOW).unwrap();
        assert_eq!(payload["type"], "user.created");
    }

    #[test]
    fn rejects_tampered_body() {
        let verifier = verifier();
        let headers = signed_headers(&verifier, NOW, BODY);
        let tampered = br#"{"type":"user.deleted","data":{"id":"user_1"}}"#;
        assert_matches!(
            verifier.verify_at(&headers, tampered, NOW),
            Err(VerificationError::NoMatchingSignature)
        );
    }

    #[test]
    fn reserialized_body_does_not_verify() {
        let verifier = verifier();
        let raw = b"{\"type\": \"user.created\",\n \"data\": {\"id\": \"user_1\"}}";
        let headers = signed_headers(&verifier, NOW, raw);
        assert!(verifier.verify_at(&headers, raw, NOW).is_ok());

        let value: serde_json::Value = serde_json::from_slice(raw).unwrap();
        let reserialized = serde_json::to_vec(&value).unwrap();
        assert_matches!(
            verifier.verify_at(&headers, &reserialized, NOW),
            Err(VerificationError::NoMatchingSignature)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let signer = WebhookVerifier::new(WebhookSecret::from_bytes(b"other".to_vec()), 300);
        let headers = signed_headers(&signer, NOW, BODY);
        assert_matches!(
            verifier().verify_at(&headers, BODY, NOW),
            Err(VerificationError::NoMatchingSignature)
        );
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let verifier = verifier();
        let valid = verifier.sign("msg_1", NOW, BODY).unwrap();
        let headers = WebhookHeaders {
            msg_id: "msg_1".into(),
            timestamp: NOW.to_string(),
            signature: format!("v1,bm9wZQ== v2,ignored {valid}"),
        };
        assert!(verifier.verify_at(&headers, BODY, NOW).is_ok());
    }

    #[test]
    fn ignores_other_versions() {
        let verifier = verifier();
        let valid = verifier.sign("msg_1", NOW, BODY).unwrap();
        let (_, sig) = valid.split_once(',').unwrap();
        let headers = WebhookHeaders {
            msg_id: "msg_1".into(),
            timestamp: NOW.to_string(),
            signature: format!("v1a,{sig}"),
        };
        assert_matches!(
            verifier.verify_at(&headers, BODY, NOW),
            Err(VerificationError::NoMatchingSignature)
        );
    }

    #[test]
    fn enforces_timestamp_tolerance() {
        let verifier = verifier();
        let old = signed_headers(&verifier, NOW - 301, BODY);
        assert_matches!(
            verifier.verify_at(&old, BODY, NOW),
            Err(VerificationError::TimestampTooOld)
        );

        let future = signed_headers(&verifier, NOW + 301, BODY);
        assert_matches!(
            verifier.verify_at(&future, BODY, NOW),
            Err(VerificationError::TimestampTooNew)
        );

        let edge = signed_headers(&verifier, NOW - 300, BODY);
        assert!(verifier.verify_at(&edge, BODY, NOW).is_ok());
    }

    #[test]
    fn rejects_garbage_timestamp() {
        let verifier = verifier();
        let mut headers = signed_headers(&verifier, NOW, BODY);
        headers.timestamp = "yesterday".into();
        assert_matches!(
            verifier.verify_at(&headers, BODY, NOW),
            Err(VerificationError::InvalidTimestamp)
        );
    }

    #[test]
    fn signed_non_json_body_is_rejected() {
        let verifier = verifier();
        let body = b"not json";
        let headers = signed_headers(&verifier, NOW, body);
        assert_matches!(
            verifier.verify_at(&headers, body, NOW),
            Err(VerificationError::InvalidJson(_))
        );
    }

    #[test]
    fn secret_parsing() {
        let secret = WebhookSecret::parse("whsec_dGVzdC1zaWduaW5nLWtleQ==").unwrap();
        assert_eq!(secret.0, b"test-signing-key");
        assert_eq!(secret.encode(), "whsec_dGVzdC1zaWduaW5nLWtleQ==");

        let unprefixed = WebhookSecret::parse("dGVzdC1zaWduaW5nLWtleQ==").unwrap();
        assert_eq!(unprefixed.0, secret.0);

        assert_matches!(
            WebhookSecret::parse("whsec_***"),
            Err(VerificationError::InvalidSecret)
        );
        assert_matches!(
            WebhookSecret::parse("whsec_"),
            Err(VerificationError::InvalidSecret)
        );
        assert_eq!(format!("{secret:?}"), "WebhookSecret(..)");
    }

    #[test]
    fn reads_headers_with_fallback_names() {
        let mut map = HeaderMap::new();
        map.insert("webhook-id", HeaderValue::from_static("msg_9"));
        map.insert("svix-timestamp", HeaderValue::from_static("1700000000"));
        map.insert("svix-signature", HeaderValue::from_static("v1,abc"));

        let headers = WebhookHeaders::from_header_map(&map).unwrap();
        assert_eq!(headers.msg_id, "msg_9");
        assert_eq!(headers.timestamp, "1700000000");
        assert_eq!(headers.signature, "v1,abc");
    }

    #[test]
    fn missing_header_is_reported_by_branded_name() {
        let mut map = HeaderMap::new();
        map.insert("svix-id", HeaderValue::from_static("msg_1"));
        map.insert("svix-timestamp", HeaderValue::from_static("1700000000"));
        assert_matches!(
            WebhookHeaders::from_header_map(&map),
            Err(VerificationError::MissingHeader("svix-signature"))
        );
    }
}
