//! Approval gate and the automatic approver that sits in front of it.

pub mod auto;
pub mod gate;

use chrono::Utc;
use leadflow_types::approval::{
    ApprovalPriority, ApprovalRequest, ApprovalStatus, ApprovalType,
};
use leadflow_types::error::RepositoryError;
use leadflow_types::monitoring::{EventRefs, EventType};
use leadflow_types::workflow::WorkflowExecution;
use serde_json::json;
use uuid::Uuid;

use crate::monitor::EventMonitor;
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;

/// Insert a `pending` request for `execution`, expiring after `expires_in`.
///
/// Shared by the executor (which gates new executions) and the gate's own
/// `create`.
pub(crate) async fn open_request<A: ApprovalRepository, M: MonitoringRepository>(
    approvals: &A,
    monitor: &EventMonitor<M>,
    execution: &WorkflowExecution,
    approval_type: ApprovalType,
    priority: ApprovalPriority,
    expires_in: chrono::Duration,
) -> Result<ApprovalRequest, RepositoryError> {
    let now = Utc::now();
    let request = ApprovalRequest {
        id: Uuid::now_v7(),
        execution_id: execution.id,
        workflow_id: execution.workflow_id,
        approval_type,
        status: ApprovalStatus::Pending,
        priority,
        auto_approval_confidence: None,
        escalation_level: 0,
        context: execution.input.clone(),
        decided_by: None,
        decision_reason: None,
        auto_approved: false,
        expires_at: now + expires_in,
        created_at: now,
        decided_at: None,
    };
    approvals.create(&request).await?;

    tracing::info!(
        approval_id = %request.id,
        execution_id = %execution.id,
        approval_type = %approval_type,
        expires_at = %request.expires_at,
        "approval requested"
    );
    monitor
        .info(
            EventType::ApprovalRequested,
            EventRefs::execution(execution.workflow_id, execution.id).with_approval(request.id),
            json!({
                "approval_type": approval_type,
                "priority": priority,
                "expires_at": request.expires_at,
            }),
        )
        .await;
    Ok(request)
}

/// Reviewer tier notified at each escalation level.
pub fn reviewer_tier(level: u8) -> &'static str {
    match level {
        0 => "reviewer",
        1 => "team_lead",
        2 => "manager",
        3 => "director",
        _ => "executive",
    }
}
