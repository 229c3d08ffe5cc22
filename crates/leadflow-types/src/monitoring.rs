//! Monitoring event types.
//!
//! Monitoring events are the append-only product log behind dashboards and
//! error queries. Operator logs go through `tracing` instead.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Event severity. Ordered `Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("invalid severity: '{s}'"))
    }
}

/// Lifecycle event names, stored as dotted strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "webhook.received")]
    WebhookReceived,
    #[serde(rename = "webhook.duplicate")]
    WebhookDuplicate,
    #[serde(rename = "webhook.rejected")]
    WebhookRejected,
    #[serde(rename = "webhook.unmatched")]
    WebhookUnmatched,
    #[serde(rename = "webhook.dispatched")]
    WebhookDispatched,
    #[serde(rename = "webhook.retry_scheduled")]
    WebhookRetryScheduled,
    #[serde(rename = "webhook.failed")]
    WebhookFailed,
    #[serde(rename = "webhook.reclaimed")]
    WebhookReclaimed,
    #[serde(rename = "webhook.cancelled")]
    WebhookCancelled,
    #[serde(rename = "execution.created")]
    ExecutionCreated,
    #[serde(rename = "execution.started")]
    ExecutionStarted,
    #[serde(rename = "execution.completed")]
    ExecutionCompleted,
    #[serde(rename = "execution.failed")]
    ExecutionFailed,
    #[serde(rename = "execution.cancelled")]
    ExecutionCancelled,
    #[serde(rename = "execution.retried")]
    ExecutionRetried,
    #[serde(rename = "execution.timeout")]
    ExecutionTimeout,
    #[serde(rename = "execution.recovered")]
    ExecutionRecovered,
    #[serde(rename = "approval.requested")]
    ApprovalRequested,
    #[serde(rename = "approval.approved")]
    ApprovalApproved,
    #[serde(rename = "approval.rejected")]
    ApprovalRejected,
    #[serde(rename = "approval.expired")]
    ApprovalExpired,
    #[serde(rename = "approval.escalated")]
    ApprovalEscalated,
    #[serde(rename = "approval.auto_approved")]
    ApprovalAutoApproved,
    #[serde(rename = "approval.auto_deferred")]
    ApprovalAutoDeferred,
    #[serde(rename = "workflow.created")]
    WorkflowCreated,
    #[serde(rename = "workflow.updated")]
    WorkflowUpdated,
    #[serde(rename = "workflow.deactivated")]
    WorkflowDeactivated,
    #[serde(rename = "registry.synced")]
    RegistrySynced,
    #[serde(rename = "job.failed")]
    JobFailed,
}

impl EventType {
    pub const ALL: [EventType; 29] = [
        EventType::WebhookReceived,
        EventType::WebhookDuplicate,
        EventType::WebhookRejected,
        EventType::WebhookUnmatched,
        EventType::WebhookDispatched,
        EventType::WebhookRetryScheduled,
        EventType::WebhookFailed,
        EventType::WebhookReclaimed,
        EventType::WebhookCancelled,
        EventType::ExecutionCreated,
        EventType::ExecutionStarted,
        EventType::ExecutionCompleted,
        EventType::ExecutionFailed,
        EventType::ExecutionCancelled,
        EventType::ExecutionRetried,
        EventType::ExecutionTimeout,
        EventType::ExecutionRecovered,
        EventType::ApprovalRequested,
        EventType::ApprovalApproved,
        EventType::ApprovalRejected,
        EventType::ApprovalExpired,
        EventType::ApprovalEscalated,
        EventType::ApprovalAutoApproved,
        EventType::ApprovalAutoDeferred,
        EventType::WorkflowCreated,
        EventType::WorkflowUpdated,
        EventType::WorkflowDeactivated,
        EventType::RegistrySynced,
        EventType::JobFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WebhookReceived => "webhook.received",
            EventType::WebhookDuplicate => "webhook.duplicate",
            EventType::WebhookRejected => "webhook.rejected",
            EventType::WebhookUnmatched => "webhook.unmatched",
            EventType::WebhookDispatched => "webhook.dispatched",
            EventType::WebhookRetryScheduled => "webhook.retry_scheduled",
            EventType::WebhookFailed => "webhook.failed",
            EventType::WebhookReclaimed => "webhook.reclaimed",
            EventType::WebhookCancelled => "webhook.cancelled",
            EventType::ExecutionCreated => "execution.created",
            EventType::ExecutionStarted => "execution.started",
            EventType::ExecutionCompleted => "execution.completed",
            EventType::ExecutionFailed => "execution.failed",
            EventType::ExecutionCancelled => "execution.cancelled",
            EventType::ExecutionRetried => "execution.retried",
            EventType::ExecutionTimeout => "execution.timeout",
            EventType::ExecutionRecovered => "execution.recovered",
            EventType::ApprovalRequested => "approval.requested",
            EventType::ApprovalApproved => "approval.approved",
            EventType::ApprovalRejected => "approval.rejected",
            EventType::ApprovalExpired => "approval.expired",
            EventType::ApprovalEscalated => "approval.escalated",
            EventType::ApprovalAutoApproved => "approval.auto_approved",
            EventType::ApprovalAutoDeferred => "approval.auto_deferred",
            EventType::WorkflowCreated => "workflow.created",
            EventType::WorkflowUpdated => "workflow.updated",
            EventType::WorkflowDeactivated => "workflow.deactivated",
            EventType::RegistrySynced => "registry.synced",
            EventType::JobFailed => "job.failed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("invalid event type: '{s}'"))
    }
}

/// Optional links from an event to the entities it concerns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRefs {
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub webhook_id: Option<Uuid>,
    pub approval_id: Option<Uuid>,
}

impl EventRefs {
    pub fn workflow(id: Uuid) -> Self {
        Self {
            workflow_id: Some(id),
            ..Default::default()
        }
    }

    pub fn webhook(id: Uuid) -> Self {
        Self {
            webhook_id: Some(id),
            ..Default::default()
        }
    }

    pub fn execution(workflow_id: Uuid, execution_id: Uuid) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            execution_id: Some(execution_id),
            ..Default::default()
        }
    }

    pub fn with_approval(mut self, approval_id: Uuid) -> Self {
        self.approval_id = Some(approval_id);
        self
    }

    pub fn with_webhook(mut self, webhook_id: Option<Uuid>) -> Self {
        self.webhook_id = webhook_id;
        self
    }
}

/// One append-only monitoring record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringEvent {
    pub id: Uuid,
    pub event_type: EventType,
    pub severity: Severity,
    #[serde(flatten)]
    pub refs: EventRefs,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MonitoringEvent {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        refs: EventRefs,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            severity,
            refs,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Filter for event queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub since: Option<DateTime<Utc>>,
    /// Only events at or above this severity.
    pub min_severity: Option<Severity>,
    pub event_type: Option<EventType>,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub limit: Option<u32>,
}

/// Aggregated view over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_events: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub queue_by_status: BTreeMap<String, u64>,
    pub executions_by_status: BTreeMap<String, u64>,
    pub pending_approvals: u64,
    /// Share of events in the window at `error` or above, 0.0-1.0.
    pub error_rate: f64,
    pub recent_errors: Vec<MonitoringEvent>,
}
