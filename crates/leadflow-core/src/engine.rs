//! Port to the external workflow engine.
//!
//! The engine runs the actual step graphs. The core only starts executions,
//! polls their state, asks for cancellation, and lists workflows for
//! registry sync. `leadflow-infra` provides the HTTP implementation.

use leadflow_types::engine::{RemoteExecutionState, RemoteWorkflow, StartedExecution};
use leadflow_types::error::ErrorKind;
use uuid::Uuid;

/// Errors reported by an engine client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Connection failure or 5xx. Worth retrying.
    #[error("engine unavailable: {0}")]
    Transient(String),

    /// 4xx. The engine refused the request and will keep refusing it.
    #[error("engine rejected request ({status}): {message}")]
    Permanent { status: u16, message: String },

    /// The call did not finish within the configured timeout.
    #[error("engine call timed out")]
    Timeout,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Transient(_) | EngineError::Timeout => ErrorKind::TransientExternal,
            EngineError::Permanent { .. } => ErrorKind::PermanentExternal,
        }
    }
}

/// The external engine as seen from the core.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowEngine: Send + Sync {
    /// Start `external_workflow_id` with `input`. `execution_id` is passed
    /// along so the engine can address its completion callback.
    fn start_execution(
        &self,
        external_workflow_id: &str,
        execution_id: Uuid,
        input: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<StartedExecution, EngineError>> + Send;

    fn get_execution_status(
        &self,
        external_execution_id: &str,
    ) -> impl std::future::Future<Output = Result<RemoteExecutionState, EngineError>> + Send;

    /// Ask the engine to stop an execution. Advisory: the engine may finish
    /// the run anyway.
    fn cancel_execution(
        &self,
        external_execution_id: &str,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;

    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RemoteWorkflow>, EngineError>> + Send;
}
