//! Queued webhook types.
//!
//! A `QueuedWebhook` is the durable record of one inbound trigger event. It is
//! created on receipt, claimed by a worker with an atomic status transition,
//! and finishes in exactly one of the terminal states `sent`, `failed` or
//! `cancelled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Lowest accepted webhook priority.
pub const MIN_PRIORITY: i32 = 0;
/// Highest accepted webhook priority.
pub const MAX_PRIORITY: i32 = 10;

/// Lifecycle of a queued webhook.
///
/// ```text
/// queued -> processing -> sent
///    ^           |
///    +-- retry --+-> failed
/// queued -> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Queued,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl WebhookStatus {
    pub const ALL: [WebhookStatus; 5] = [
        WebhookStatus::Queued,
        WebhookStatus::Processing,
        WebhookStatus::Sent,
        WebhookStatus::Failed,
        WebhookStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Queued => "queued",
            WebhookStatus::Processing => "processing",
            WebhookStatus::Sent => "sent",
            WebhookStatus::Failed => "failed",
            WebhookStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal rows never re-enter the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WebhookStatus::Sent | WebhookStatus::Failed | WebhookStatus::Cancelled
        )
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WebhookStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("invalid webhook status: '{s}'"))
    }
}

/// A durable inbound trigger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedWebhook {
    pub id: Uuid,
    /// Hex SHA-256 of sender, event type, and payload. Duplicate deliveries
    /// collapse onto one row while that row is non-terminal.
    pub idempotency_key: Option<String>,
    /// Sender identifier (`X-Webhook-Source`, or "unknown").
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Set when the webhook arrived on a workflow-specific route.
    pub target_workflow_id: Option<Uuid>,
    pub status: WebhookStatus,
    /// Higher values are claimed first.
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Input to an enqueue call, produced by envelope normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhook {
    pub idempotency_key: Option<String>,
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub target_workflow_id: Option<Uuid>,
    pub priority: i32,
    pub max_retries: u32,
}

impl NewWebhook {
    /// Clamp priority into the accepted range.
    pub fn clamped_priority(&self) -> i32 {
        self.priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
    }
}

/// Result of an idempotent enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub id: Uuid,
    /// True when a live row with the same idempotency key already existed.
    pub duplicate: bool,
}

/// Result of recording a transient processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
    /// Back in the queue, eligible again at `next_retry_at`.
    Requeued {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Retries exhausted; the row is terminal.
    Failed { retry_count: u32 },
    /// The row was no longer `processing` (another worker already resolved it).
    NotProcessing,
}
