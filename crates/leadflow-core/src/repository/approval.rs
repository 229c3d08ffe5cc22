//! Approval repository trait.

use chrono::{DateTime, Utc};
use leadflow_types::approval::{ApprovalFilter, ApprovalRequest, Decision};
use leadflow_types::error::RepositoryError;
use uuid::Uuid;

/// Storage for approval requests.
///
/// At most one `pending` request may exist per execution; a second insert
/// is `RepositoryError::Conflict`.
pub trait ApprovalRepository: Send + Sync {
    fn create(
        &self,
        request: &ApprovalRequest,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    fn get_pending_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Most recent request for an execution, whatever its status.
    fn latest_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Highest priority first, then oldest.
    fn list(
        &self,
        filter: &ApprovalFilter,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;

    fn count_pending(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Compare-and-set `pending -> decision.status`.
    fn decide(
        &self,
        id: &Uuid,
        decision: &Decision,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Compare-and-set `pending -> approved` that also requires fewer than
    /// `cap` auto-approvals for the workflow since `day_start`. Both checks
    /// happen in one statement.
    fn auto_approve(
        &self,
        id: &Uuid,
        decision: &Decision,
        workflow_id: &Uuid,
        day_start: DateTime<Utc>,
        cap: u32,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Record the scorer's confidence on a pending request.
    fn set_confidence(
        &self,
        id: &Uuid,
        confidence: f64,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Bump the escalation level (below `max_level`) and raise priority one
    /// tier on a pending request. Returns the updated row.
    fn escalate(
        &self,
        id: &Uuid,
        max_level: u8,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Pending requests with `expires_at <= now`, oldest first.
    fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;

    fn count_auto_approved_since(
        &self,
        workflow_id: &Uuid,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
