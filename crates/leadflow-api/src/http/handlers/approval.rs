//! Approval handlers.
//!
//! A decision that loses the race to another reviewer or the expiry sweep
//! answers `409` with the status that won.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use leadflow_core::approval::gate::{
    BulkItemOutcome, BulkItemResult, DecisionOutcome, EscalationOutcome,
};
use leadflow_types::approval::ApprovalRequest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::ApprovalListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Upper bound on ids per bulk call.
pub const MAX_BULK: usize = 200;

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    /// Reviewer identity recorded as `decided_by`.
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDecisionRequest {
    pub ids: Vec<Uuid>,
    pub approved: bool,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkDecisionResponse {
    pub applied: usize,
    pub results: Vec<BulkItemResult>,
}

/// GET /api/v1/approvals
pub async fn list_approvals(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<ApprovalListQuery>,
) -> Result<Json<ApiResponse<Vec<ApprovalRequest>>>, AppError> {
    let start = Instant::now();
    let filter = query.into_filter()?;
    let approvals = state.orchestrator.gate.list(&filter).await?;
    Ok(Json(ApiResponse::timed(approvals, start)))
}

/// GET /api/v1/approvals/{id}
pub async fn get_approval(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ApprovalRequest>>, AppError> {
    let start = Instant::now();
    let approval = state.orchestrator.gate.get(&id).await?;
    let execution = format!("/api/v1/executions/{}", approval.execution_id);
    Ok(Json(
        ApiResponse::timed(approval, start)
            .with_link("execution", &execution)
            .with_link("approve", &format!("/api/v1/approvals/{id}/approve"))
            .with_link("reject", &format!("/api/v1/approvals/{id}/reject")),
    ))
}

/// POST /api/v1/approvals/{id}/approve
pub async fn approve(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<ApprovalRequest>>, AppError> {
    decide(state, &auth, id, true, request).await
}

/// POST /api/v1/approvals/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<ApprovalRequest>>, AppError> {
    decide(state, &auth, id, false, request).await
}

async fn decide(
    state: AppState,
    auth: &Authenticated,
    id: Uuid,
    approved: bool,
    request: DecisionRequest,
) -> Result<Json<ApiResponse<ApprovalRequest>>, AppError> {
    let start = Instant::now();
    let actor = validate_actor(&request.actor)?;
    tracing::info!(
        approval_id = %id,
        key_id = %auth.key_id,
        actor,
        approved,
        "approval decision submitted"
    );
    match state
        .orchestrator
        .gate
        .decide(id, approved, actor, request.reason)
        .await?
    {
        DecisionOutcome::Applied { approval } => Ok(Json(ApiResponse::timed(approval, start))),
        DecisionOutcome::Conflict { current } => Err(AppError::Conflict(format!(
            "approval {id} is already {current}"
        ))),
    }
}

/// POST /api/v1/approvals/{id}/escalate
pub async fn escalate(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<EscalationOutcome>>, AppError> {
    let start = Instant::now();
    match state.orchestrator.gate.escalate(id).await? {
        EscalationOutcome::NotPending { current } => Err(AppError::Conflict(format!(
            "approval {id} is already {current}"
        ))),
        outcome => Ok(Json(ApiResponse::timed(outcome, start))),
    }
}

/// POST /api/v1/approvals/bulk
///
/// Each id is decided independently; the response lists every outcome.
pub async fn bulk_decide(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<BulkDecisionRequest>,
) -> Result<Json<ApiResponse<BulkDecisionResponse>>, AppError> {
    let start = Instant::now();
    let actor = validate_actor(&request.actor)?;
    if request.ids.is_empty() {
        return Err(AppError::Validation("ids cannot be empty".to_string()));
    }
    if request.ids.len() > MAX_BULK {
        return Err(AppError::Validation(format!(
            "at most {MAX_BULK} ids per call, got {}",
            request.ids.len()
        )));
    }

    tracing::info!(
        key_id = %auth.key_id,
        actor,
        count = request.ids.len(),
        approved = request.approved,
        "bulk approval decision submitted"
    );
    let results = state
        .orchestrator
        .gate
        .bulk_decide(&request.ids, request.approved, actor, request.reason)
        .await;
    let applied = results
        .iter()
        .filter(|r| matches!(r.outcome, BulkItemOutcome::Applied { .. }))
        .count();
    Ok(Json(ApiResponse::timed(
        BulkDecisionResponse { applied, results },
        start,
    )))
}

fn validate_actor(actor: &str) -> Result<&str, AppError> {
    let actor = actor.trim();
    if actor.is_empty() {
        return Err(AppError::Validation("actor cannot be empty".to_string()));
    }
    Ok(actor)
}
