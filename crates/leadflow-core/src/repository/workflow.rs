//! Workflow repository trait definition.
//!
//! Covers two entity families:
//! - **Definitions:** the registry catalog, indexed by trigger event.
//! - **Executions:** attempts to run a definition, with guarded transitions.
//!
//! Statistics on the definition row are bumped inside the same transaction
//! as the execution insert or terminal transition that caused them.

use chrono::{DateTime, Utc};
use leadflow_types::error::RepositoryError;
use leadflow_types::workflow::{
    ExecutionFilter, ExecutionStatus, WorkflowDefinition, WorkflowExecution,
};
use uuid::Uuid;

/// Field changes applied together with a status transition.
#[derive(Debug, Clone)]
pub struct ExecutionTransition {
    pub to: ExecutionStatus,
    pub external_execution_id: Option<String>,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ExecutionTransition {
    pub fn to(status: ExecutionStatus) -> Self {
        Self {
            to: status,
            external_execution_id: None,
            output: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// `pending -> running` once the engine accepted the start call.
    pub fn started(external_execution_id: String, now: DateTime<Utc>) -> Self {
        Self {
            external_execution_id: Some(external_execution_id),
            started_at: Some(now),
            ..Self::to(ExecutionStatus::Running)
        }
    }

    /// A terminal transition stamped with completion time and duration.
    pub fn finished(
        execution: &WorkflowExecution,
        to: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> Self {
        let began = execution.started_at.unwrap_or(execution.created_at);
        Self {
            completed_at: Some(now),
            duration_ms: Some((now - began).num_milliseconds().max(0)),
            ..Self::to(to)
        }
    }

    pub fn with_output(mut self, output: Option<serde_json::Value>) -> Self {
        self.output = output;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// Repository trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Insert a definition and its trigger-event rows. A duplicate name is
    /// `RepositoryError::Conflict`.
    fn create_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite the mutable fields and trigger events. Counters are left
    /// alone.
    fn update_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    fn get_definition_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    fn list_definitions(
        &self,
        active_only: bool,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Active definitions tagged with `event`, ordered by name.
    fn find_by_trigger(
        &self,
        event: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Flip `is_active`. Returns `false` if the flag already had that value.
    fn set_active(
        &self,
        id: &Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Insert a `pending` execution and bump the definition's
    /// `execution_count`.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Newest first.
    fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Executions in `status` that began (started, else created) at or
    /// before `before`, oldest first.
    fn list_oldest_executions(
        &self,
        status: ExecutionStatus,
        before: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// `pending` executions created at or before `before` that have no
    /// pending approval request, oldest first.
    fn list_stalled_pending(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Apply `transition` if the current status is one of `from`. Terminal
    /// `completed`/`failed` transitions bump the matching counter on the
    /// definition in the same transaction.
    fn transition_execution(
        &self,
        id: &Uuid,
        from: &[ExecutionStatus],
        transition: &ExecutionTransition,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn count_executions_by_status(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(ExecutionStatus, u64)>, RepositoryError>> + Send;
}
