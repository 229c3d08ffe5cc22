//! Normalization of an inbound webhook request into a queueable record.

use leadflow_types::error::ErrorKind;
use leadflow_types::webhook::{MAX_PRIORITY, MIN_PRIORITY, NewWebhook};
use reqwest::header::HeaderMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::signature::{EVENT_TYPE_HEADER, SOURCE_HEADER, header_str, hex_encode};

/// Event type used for targeted deliveries that name no event.
pub const TARGETED_EVENT_TYPE: &str = "webhook";

const UNKNOWN_SOURCE: &str = "unknown";

/// Which inbound route a request arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `POST /webhooks/generic`: dispatched by event type alone.
    Generic,
    /// `POST /webhooks/{workflow}`, resolved to the definition's name.
    Targeted { workflow_name: String },
}

impl Route {
    pub fn label(&self) -> &str {
        match self {
            Route::Generic => "generic",
            Route::Targeted { workflow_name } => workflow_name,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("no event type in header or payload")]
    MissingEventType,
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

/// A verified, normalized inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEnvelope {
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub idempotency_key: String,
}

impl WebhookEnvelope {
    pub fn from_request(
        route: &Route,
        headers: &HeaderMap,
        body: &[u8],
        default_priority: i32,
    ) -> Result<Self, EnvelopeError> {
        let payload: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;

        let event_type = header_str(headers, EVENT_TYPE_HEADER)
            .map(str::to_string)
            .or_else(|| payload_str(&payload, "event"))
            .or_else(|| payload_str(&payload, "type"))
            .or_else(|| match route {
                Route::Targeted { .. } => Some(TARGETED_EVENT_TYPE.to_string()),
                Route::Generic => None,
            })
            .ok_or(EnvelopeError::MissingEventType)?;

        let source = header_str(headers, SOURCE_HEADER)
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string();

        let priority = payload
            .get("priority")
            .and_then(serde_json::Value::as_i64)
            .map(|p| p.clamp(MIN_PRIORITY as i64, MAX_PRIORITY as i64) as i32)
            .unwrap_or(default_priority);

        let idempotency_key = idempotency_key(&source, &event_type, &payload);

        Ok(Self {
            source,
            event_type,
            payload,
            priority,
            idempotency_key,
        })
    }

    pub fn into_new_webhook(self, target_workflow_id: Option<Uuid>, max_retries: u32) -> NewWebhook {
        NewWebhook {
            idempotency_key: Some(self.idempotency_key),
            source: self.source,
            event_type: self.event_type,
            payload: self.payload,
            target_workflow_id,
            priority: self.priority,
            max_retries,
        }
    }
}

/// Hex SHA-256 over source, event type and the canonical payload.
///
/// Object keys are sorted before hashing, so two deliveries with the same
/// content but different key order produce the same key.
pub fn idempotency_key(source: &str, event_type: &str, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(event_type.as_bytes());
    hasher.update([0u8]);
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);
    hasher.update(canonical.as_bytes());
    hex_encode(&hasher.finalize())
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn payload_str(payload: &serde_json::Value, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
