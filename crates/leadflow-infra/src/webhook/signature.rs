//! HMAC-SHA256 request signatures with a replay window.
//!
//! The signed message is the timestamp header exactly as sent (trimmed)
//! immediately followed by the raw body. The signature header carries lowercase hex, optionally
//! prefixed with `sha256=`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use leadflow_types::error::ErrorKind;
use reqwest::header::HeaderMap;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const SOURCE_HEADER: &str = "x-webhook-source";
pub const EVENT_TYPE_HEADER: &str = "x-event-type";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("timestamp outside replay window ({age_secs}s old, limit {max_age_secs}s)")]
    Expired { age_secs: i64, max_age_secs: u64 },

    #[error("signature mismatch")]
    Mismatch,

    #[error("no secret configured for {0}")]
    NoSecret(String),
}

impl SignatureError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Authentication
    }
}

/// Compute the hex signature for `timestamp || body`.
pub fn sign(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(body);
    hex_encode(&mac.finalize().into_bytes())
}

/// Verify a signature against `timestamp || body` at time `now`.
///
/// The MAC covers the timestamp text as received, not its parsed value, so
/// `0123` and `123` are different messages. The timestamp is checked first
/// so an expired request is reported as such even when its signature is
/// valid.
pub fn verify(
    secret: &[u8],
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<(), SignatureError> {
    let timestamp = timestamp.trim();
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_string()))?;

    let age_secs = (now.timestamp() - ts).abs();
    if age_secs as u64 > max_age.as_secs() {
        return Err(SignatureError::Expired {
            age_secs,
            max_age_secs: max_age.as_secs(),
        });
    }

    let hex_sig = signature.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let expected = hex_decode(hex_sig).ok_or(SignatureError::Mismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Pull the signature and timestamp headers and verify them.
pub fn verify_headers(
    secret: &[u8],
    headers: &HeaderMap,
    body: &[u8],
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<(), SignatureError> {
    let signature = header_str(headers, SIGNATURE_HEADER)
        .ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;
    let timestamp = header_str(headers, TIMESTAMP_HEADER)
        .ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
    verify(secret, timestamp, body, signature, now, max_age)
}

/// A header value as trimmed UTF-8, `None` when absent, empty or not text.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
