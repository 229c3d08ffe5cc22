//! Execution handlers: list, inspect, retry, cancel.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use leadflow_core::executor::{CancelOutcome, TriggerOutcome};
use leadflow_types::approval::ApprovalRequest;
use leadflow_types::workflow::WorkflowExecution;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::ExecutionListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// A new execution and the approval it waits on, if any.
#[derive(Debug, Serialize)]
pub struct TriggeredExecution {
    pub execution: WorkflowExecution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

impl From<TriggerOutcome> for TriggeredExecution {
    fn from(outcome: TriggerOutcome) -> Self {
        match outcome {
            TriggerOutcome::ReadyToStart { execution, .. } => Self {
                execution,
                approval: None,
            },
            TriggerOutcome::AwaitingApproval {
                execution, approval, ..
            } => Self {
                execution,
                approval: Some(approval),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub actor: Option<String>,
}

/// GET /api/v1/executions
pub async fn list_executions(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<ExecutionListQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowExecution>>>, AppError> {
    let start = Instant::now();
    let filter = query.into_filter()?;
    let executions = state.orchestrator.executor.list(&filter).await?;
    Ok(Json(ApiResponse::timed(executions, start)))
}

/// GET /api/v1/executions/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let start = Instant::now();
    let execution = state.orchestrator.executor.get(&id).await?;
    let workflow = format!("/api/v1/workflows/{}", execution.workflow_id);
    Ok(Json(
        ApiResponse::timed(execution, start).with_link("workflow", &workflow),
    ))
}

/// POST /api/v1/executions/{id}/retry
pub async fn retry_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TriggeredExecution>>, AppError> {
    let start = Instant::now();
    let outcome = state.orchestrator.executor.retry(id).await?;
    let view = TriggeredExecution::from(outcome);
    let href = format!("/api/v1/executions/{}", view.execution.id);
    Ok(Json(ApiResponse::timed(view, start).with_link("self", &href)))
}

/// POST /api/v1/executions/{id}/cancel
pub async fn cancel_execution(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<ApiResponse<CancelOutcome>>, AppError> {
    let start = Instant::now();
    let actor = body
        .and_then(|Json(request)| request.actor)
        .unwrap_or_else(|| "api".to_string());
    let outcome = state.orchestrator.executor.cancel(id, &actor).await?;
    Ok(Json(ApiResponse::timed(outcome, start)))
}
