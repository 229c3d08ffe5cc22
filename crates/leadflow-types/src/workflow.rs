//! Workflow definition and execution types.
//!
//! A `WorkflowDefinition` is the local catalog entry for an automation that
//! runs in the external engine. A `WorkflowExecution` is one attempt to run
//! it, driven through a monotonic state machine:
//!
//! ```text
//! pending --(approved or no approval needed, engine accepts)--> running
//! pending --(engine rejects | approval rejected/expired)------> failed
//! running --(engine reports success)--------------------------> completed
//! running --(engine reports failure | timeout)----------------> failed
//! pending|running --(operator cancel)-------------------------> cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::approval::{ApprovalPriority, ApprovalType};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A known automation and the trigger events it responds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    /// Unique, human-facing name.
    pub name: String,
    pub description: Option<String>,
    /// The engine's identifier for this workflow.
    pub external_workflow_id: String,
    /// Event names that fire this workflow, in declaration order.
    pub trigger_events: Vec<String>,
    pub is_active: bool,
    pub requires_approval: bool,
    pub approval_type: ApprovalType,
    pub approval_priority: ApprovalPriority,
    pub auto_approval_enabled: bool,
    /// Per-definition override of the daily auto-approval cap.
    pub auto_approval_daily_cap: Option<u32>,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Whether this definition responds to `event`.
    pub fn handles(&self, event: &str) -> bool {
        self.trigger_events.iter().any(|e| e == event)
    }
}

/// Fields accepted when creating a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub external_workflow_id: String,
    #[serde(default)]
    pub trigger_events: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_type: ApprovalType,
    #[serde(default)]
    pub approval_priority: ApprovalPriority,
    #[serde(default)]
    pub auto_approval_enabled: bool,
    #[serde(default)]
    pub auto_approval_daily_cap: Option<u32>,
}

impl NewWorkflowDefinition {
    /// Build a full definition with fresh identity and zeroed counters.
    pub fn into_definition(self, now: DateTime<Utc>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: self.name,
            description: self.description,
            external_workflow_id: self.external_workflow_id,
            trigger_events: dedup_events(self.trigger_events),
            is_active: true,
            requires_approval: self.requires_approval,
            approval_type: self.approval_type,
            approval_priority: self.approval_priority,
            auto_approval_enabled: self.auto_approval_enabled,
            auto_approval_daily_cap: self.auto_approval_daily_cap,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a definition. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    pub description: Option<String>,
    pub external_workflow_id: Option<String>,
    pub trigger_events: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub requires_approval: Option<bool>,
    pub approval_type: Option<ApprovalType>,
    pub approval_priority: Option<ApprovalPriority>,
    pub auto_approval_enabled: Option<bool>,
    pub auto_approval_daily_cap: Option<u32>,
}

impl WorkflowUpdate {
    /// Apply the update in place.
    pub fn apply(self, def: &mut WorkflowDefinition, now: DateTime<Utc>) {
        if let Some(description) = self.description {
            def.description = Some(description);
        }
        if let Some(external_id) = self.external_workflow_id {
            def.external_workflow_id = external_id;
        }
        if let Some(events) = self.trigger_events {
            def.trigger_events = dedup_events(events);
        }
        if let Some(active) = self.is_active {
            def.is_active = active;
        }
        if let Some(requires) = self.requires_approval {
            def.requires_approval = requires;
        }
        if let Some(kind) = self.approval_type {
            def.approval_type = kind;
        }
        if let Some(priority) = self.approval_priority {
            def.approval_priority = priority;
        }
        if let Some(enabled) = self.auto_approval_enabled {
            def.auto_approval_enabled = enabled;
        }
        if let Some(cap) = self.auto_approval_daily_cap {
            def.auto_approval_daily_cap = Some(cap);
        }
        def.updated_at = now;
    }
}

/// Trim, drop empties, and drop repeats while keeping first-seen order.
fn dedup_events(events: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(events.len());
    for event in events {
        let event = event.trim().to_string();
        if !event.is_empty() && !out.contains(&event) {
            out.push(event);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

/// Execution lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 5] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the execution state machine.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// States from which `next` may be entered.
    pub fn predecessors(next: ExecutionStatus) -> Vec<ExecutionStatus> {
        ExecutionStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExecutionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("invalid execution status: '{s}'"))
    }
}

/// Well-known failure reasons recorded in `error_message`.
pub mod failure_reason {
    pub const APPROVAL_REJECTED: &str = "approval_rejected";
    pub const APPROVAL_EXPIRED: &str = "approval_expired";
    pub const TIMEOUT: &str = "timeout";
    pub const ENGINE_TIMEOUT: &str = "engine_timeout";
}

/// One attempt to run a workflow in the external engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    /// The queued webhook that caused this execution, if any.
    pub webhook_id: Option<Uuid>,
    /// Assigned once the engine accepts the start call.
    pub external_execution_id: Option<String>,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Number of earlier attempts in this retry chain.
    pub retry_count: u32,
    /// The failed execution this one retries.
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl WorkflowExecution {
    /// A fresh `pending` execution for `def`.
    pub fn pending(
        def: &WorkflowDefinition,
        input: serde_json::Value,
        webhook_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: def.id,
            workflow_name: def.name.clone(),
            webhook_id,
            external_execution_id: None,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error_message: None,
            retry_count: 0,
            retry_of: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// A new attempt that retries this (failed) execution with the same input.
    pub fn retry_attempt(&self) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name.clone(),
            webhook_id: self.webhook_id,
            external_execution_id: None,
            status: ExecutionStatus::Pending,
            input: self.input.clone(),
            output: None,
            error_message: None,
            retry_count: self.retry_count + 1,
            retry_of: Some(self.id),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

/// Filter for execution list queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<u32>,
}

/// Terminal result of an execution as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        #[serde(default)]
        output: Option<serde_json::Value>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
}

impl ExecutionResult {
    pub fn target_status(&self) -> ExecutionStatus {
        match self {
            ExecutionResult::Success { .. } => ExecutionStatus::Completed,
            ExecutionResult::Error { .. } => ExecutionStatus::Failed,
        }
    }
}
