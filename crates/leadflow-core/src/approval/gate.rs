//! Approval gate: create, decide, escalate, bulk-decide and expire approval
//! requests.
//!
//! Every resolution is a compare-and-set out of `pending`. When a human
//! decision and the expiry sweep race for the same row, the first writer
//! wins and the other side gets a `Conflict` outcome, never an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadflow_types::approval::{
    ApprovalFilter, ApprovalPriority, ApprovalRequest, ApprovalStatus, ApprovalType, Decision,
    EXPIRY_ACTOR, MAX_ESCALATION_LEVEL,
};
use leadflow_types::error::{ErrorKind, RepositoryError};
use leadflow_types::monitoring::{EventRefs, EventType};
use leadflow_types::workflow::{failure_reason, WorkflowExecution};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{open_request, reviewer_tier};
use crate::engine::WorkflowEngine;
use crate::executor::{ExecutorError, WorkflowExecutor};
use crate::monitor::EventMonitor;
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval {0} not found")]
    NotFound(Uuid),

    #[error("an approval is already pending for execution {0}")]
    AlreadyPending(Uuid),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ApprovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApprovalError::NotFound(_) => ErrorKind::NotFound,
            ApprovalError::AlreadyPending(_) => ErrorKind::Conflict,
            ApprovalError::Executor(e) => e.kind(),
            ApprovalError::Repository(e) => e.kind(),
        }
    }
}

/// Result of a single decision.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Applied { approval: ApprovalRequest },
    /// Someone else resolved the request first.
    Conflict { current: ApprovalStatus },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalationOutcome {
    Escalated {
        approval: ApprovalRequest,
        reviewer_tier: &'static str,
    },
    AtMaxLevel { approval: ApprovalRequest },
    NotPending { current: ApprovalStatus },
}

/// Per-item result of a bulk decision.
#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub id: Uuid,
    #[serde(flatten)]
    pub outcome: BulkItemOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkItemOutcome {
    Applied { status: ApprovalStatus },
    Conflict { current: ApprovalStatus },
    NotFound,
    Error { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySweepReport {
    pub expired: u32,
    /// Rows resolved by someone else between listing and expiring.
    pub conflicts: u32,
    pub errors: u32,
}

pub struct ApprovalGate<W, A, M, E>
where
    W: WorkflowRepository,
    A: ApprovalRepository,
    M: MonitoringRepository,
    E: WorkflowEngine,
{
    approvals: Arc<A>,
    executor: Arc<WorkflowExecutor<W, A, M, E>>,
    monitor: Arc<EventMonitor<M>>,
    default_expiry: chrono::Duration,
}

impl<W, A, M, E> ApprovalGate<W, A, M, E>
where
    W: WorkflowRepository + 'static,
    A: ApprovalRepository + 'static,
    M: MonitoringRepository + 'static,
    E: WorkflowEngine + 'static,
{
    pub fn new(
        approvals: Arc<A>,
        executor: Arc<WorkflowExecutor<W, A, M, E>>,
        monitor: Arc<EventMonitor<M>>,
        default_expiry: chrono::Duration,
    ) -> Self {
        Self {
            approvals,
            executor,
            monitor,
            default_expiry,
        }
    }

    /// Open a `pending` request for `execution` (default lifetime 24h).
    pub async fn create(
        &self,
        execution: &WorkflowExecution,
        approval_type: ApprovalType,
        priority: ApprovalPriority,
        expires_in: Option<chrono::Duration>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let expires_in = expires_in.unwrap_or(self.default_expiry);
        match open_request(
            self.approvals.as_ref(),
            self.monitor.as_ref(),
            execution,
            approval_type,
            priority,
            expires_in,
        )
        .await
        {
            Ok(request) => Ok(request),
            Err(RepositoryError::Conflict(_)) => Err(ApprovalError::AlreadyPending(execution.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Approve or reject a pending request.
    ///
    /// Approval resumes the execution; rejection fails it with
    /// `approval_rejected`.
    pub async fn decide(
        &self,
        approval_id: Uuid,
        approved: bool,
        actor: &str,
        reason: Option<String>,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let request = self.load(&approval_id).await?;
        if request.status.is_terminal() {
            return Ok(DecisionOutcome::Conflict {
                current: request.status,
            });
        }

        let decision = Decision {
            status: if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            },
            actor: actor.to_string(),
            reason,
            auto_approved: false,
            decided_at: Utc::now(),
        };
        if !self.approvals.decide(&approval_id, &decision).await? {
            let current = self.load(&approval_id).await?.status;
            tracing::debug!(%approval_id, %current, "approval decision lost race");
            return Ok(DecisionOutcome::Conflict { current });
        }

        self.after_decision(&request, &decision).await;
        Ok(DecisionOutcome::Applied {
            approval: self.load(&approval_id).await?,
        })
    }

    /// Auto-approve if the workflow is still under its daily cap.
    ///
    /// The cap check and the status change are one storage operation, so
    /// concurrent evaluations cannot overshoot the cap. Returns `None` when
    /// the request stayed pending because the cap was reached.
    pub(crate) async fn auto_approve(
        &self,
        request: &ApprovalRequest,
        confidence: f64,
        day_start: DateTime<Utc>,
        cap: u32,
    ) -> Result<Option<DecisionOutcome>, ApprovalError> {
        let decision = Decision {
            status: ApprovalStatus::Approved,
            actor: leadflow_types::approval::AUTO_APPROVER_ACTOR.to_string(),
            reason: Some(format!("auto-approved with confidence {confidence:.1}")),
            auto_approved: true,
            decided_at: Utc::now(),
        };
        let applied = self
            .approvals
            .auto_approve(&request.id, &decision, &request.workflow_id, day_start, cap)
            .await?;
        if !applied {
            let current = self.load(&request.id).await?.status;
            if current == ApprovalStatus::Pending {
                return Ok(None);
            }
            return Ok(Some(DecisionOutcome::Conflict { current }));
        }

        self.after_decision(request, &decision).await;
        Ok(Some(DecisionOutcome::Applied {
            approval: self.load(&request.id).await?,
        }))
    }

    async fn after_decision(
        &self,
        request: &ApprovalRequest,
        decision: &Decision,
    ) {
        let refs =
            EventRefs::execution(request.workflow_id, request.execution_id).with_approval(request.id);
        let payload = json!({
            "actor": decision.actor,
            "reason": decision.reason,
            "auto_approved": decision.auto_approved,
        });

        if decision.status == ApprovalStatus::Approved {
            tracing::info!(approval_id = %request.id, actor = %decision.actor, "approval granted");
            let event_type = if decision.auto_approved {
                EventType::ApprovalAutoApproved
            } else {
                EventType::ApprovalApproved
            };
            self.monitor.info(event_type, refs, payload).await;
            self.executor.spawn_start(request.execution_id);
        } else {
            tracing::info!(approval_id = %request.id, actor = %decision.actor, "approval rejected");
            self.monitor
                .info(EventType::ApprovalRejected, refs, payload)
                .await;
            // The rejection is committed either way. A pending execution
            // left behind is failed by the recovery sweep.
            if let Err(e) = self
                .executor
                .fail_pending(request.execution_id, failure_reason::APPROVAL_REJECTED)
                .await
            {
                tracing::error!(
                    approval_id = %request.id,
                    execution_id = %request.execution_id,
                    error = %e,
                    "could not fail rejected execution"
                );
                self.monitor
                    .error(
                        EventType::ExecutionFailed,
                        EventRefs::execution(request.workflow_id, request.execution_id)
                            .with_approval(request.id),
                        json!({ "error": e.to_string(), "stage": "reject" }),
                    )
                    .await;
            }
        }
    }

    /// Raise a pending request's escalation level and priority.
    pub async fn escalate(&self, approval_id: Uuid) -> Result<EscalationOutcome, ApprovalError> {
        let request = self.load(&approval_id).await?;
        if request.status.is_terminal() {
            return Ok(EscalationOutcome::NotPending {
                current: request.status,
            });
        }
        if request.escalation_level >= MAX_ESCALATION_LEVEL {
            return Ok(EscalationOutcome::AtMaxLevel { approval: request });
        }

        match self
            .approvals
            .escalate(&approval_id, MAX_ESCALATION_LEVEL)
            .await?
        {
            Some(updated) => {
                let tier = reviewer_tier(updated.escalation_level);
                tracing::info!(
                    %approval_id,
                    level = updated.escalation_level,
                    reviewer_tier = tier,
                    "approval escalated"
                );
                self.monitor
                    .warning(
                        EventType::ApprovalEscalated,
                        EventRefs::execution(updated.workflow_id, updated.execution_id)
                            .with_approval(updated.id),
                        json!({
                            "level": updated.escalation_level,
                            "priority": updated.priority,
                            "reviewer_tier": tier,
                        }),
                    )
                    .await;
                Ok(EscalationOutcome::Escalated {
                    approval: updated,
                    reviewer_tier: tier,
                })
            }
            None => {
                let current = self.load(&approval_id).await?;
                if current.status.is_terminal() {
                    Ok(EscalationOutcome::NotPending {
                        current: current.status,
                    })
                } else {
                    Ok(EscalationOutcome::AtMaxLevel { approval: current })
                }
            }
        }
    }

    /// Apply `decide` to every id independently.
    pub async fn bulk_decide(
        &self,
        ids: &[Uuid],
        approved: bool,
        actor: &str,
        reason: Option<String>,
    ) -> Vec<BulkItemResult> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match self.decide(*id, approved, actor, reason.clone()).await {
                Ok(DecisionOutcome::Applied { approval }) => BulkItemOutcome::Applied {
                    status: approval.status,
                },
                Ok(DecisionOutcome::Conflict { current }) => BulkItemOutcome::Conflict { current },
                Err(ApprovalError::NotFound(_)) => BulkItemOutcome::NotFound,
                Err(e) => {
                    tracing::warn!(approval_id = %id, error = %e, "bulk decision item failed");
                    BulkItemOutcome::Error {
                        message: e.to_string(),
                    }
                }
            };
            results.push(BulkItemResult { id: *id, outcome });
        }
        results
    }

    /// Expire pending requests past their deadline and fail their
    /// executions with `approval_expired`.
    pub async fn expire_overdue(&self, limit: u32) -> Result<ExpirySweepReport, ApprovalError> {
        let now = Utc::now();
        let overdue = self.approvals.list_overdue(now, limit).await?;
        let mut report = ExpirySweepReport::default();

        for request in overdue {
            let decision = Decision {
                status: ApprovalStatus::Expired,
                actor: EXPIRY_ACTOR.to_string(),
                reason: Some(failure_reason::APPROVAL_EXPIRED.to_string()),
                auto_approved: false,
                decided_at: now,
            };
            match self.approvals.decide(&request.id, &decision).await {
                Ok(true) => {}
                Ok(false) => {
                    report.conflicts += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(approval_id = %request.id, error = %e, "approval expiry failed");
                    report.errors += 1;
                    continue;
                }
            }

            report.expired += 1;
            tracing::info!(approval_id = %request.id, execution_id = %request.execution_id, "approval expired");
            self.monitor
                .warning(
                    EventType::ApprovalExpired,
                    EventRefs::execution(request.workflow_id, request.execution_id)
                        .with_approval(request.id),
                    json!({ "cause": "deadline", "expires_at": request.expires_at }),
                )
                .await;
            if let Err(e) = self
                .executor
                .fail_pending(request.execution_id, failure_reason::APPROVAL_EXPIRED)
                .await
            {
                tracing::warn!(execution_id = %request.execution_id, error = %e, "failed to fail expired execution");
                report.errors += 1;
            }
        }
        Ok(report)
    }

    pub async fn get(&self, approval_id: &Uuid) -> Result<ApprovalRequest, ApprovalError> {
        self.load(approval_id).await
    }

    pub async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        Ok(self.approvals.list(filter).await?)
    }

    pub async fn pending_count(&self) -> Result<u64, ApprovalError> {
        Ok(self.approvals.count_pending().await?)
    }

    async fn load(&self, approval_id: &Uuid) -> Result<ApprovalRequest, ApprovalError> {
        self.approvals
            .get(approval_id)
            .await?
            .ok_or(ApprovalError::NotFound(*approval_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_item_serializes_flat() {
        let item = BulkItemResult {
            id: Uuid::nil(),
            outcome: BulkItemOutcome::Conflict {
                current: ApprovalStatus::Expired,
            },
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["outcome"], "conflict");
        assert_eq!(json["current"], "expired");
    }

    #[test]
    fn approval_error_kinds() {
        assert_eq!(ApprovalError::NotFound(Uuid::nil()).kind(), ErrorKind::NotFound);
        assert_eq!(
            ApprovalError::AlreadyPending(Uuid::nil()).kind(),
            ErrorKind::Conflict
        );
    }
}
