//! Workflow definition handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use leadflow_core::registry::SyncReport;
use leadflow_types::workflow::{NewWorkflowDefinition, WorkflowDefinition, WorkflowUpdate};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::WorkflowListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<WorkflowListQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowDefinition>>>, AppError> {
    let start = Instant::now();
    let workflows = state.orchestrator.registry.list(query.active_only).await?;
    Ok(Json(
        ApiResponse::timed(workflows, start).with_link("self", "/api/v1/workflows"),
    ))
}

/// POST /api/v1/workflows
pub async fn create_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(request): Json<NewWorkflowDefinition>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = state.orchestrator.registry.create(request).await?;
    let href = format!("/api/v1/workflows/{}", def.id);
    let webhook = format!("/webhooks/{}", def.name);
    Ok(Json(
        ApiResponse::timed(def, start)
            .with_link("self", &href)
            .with_link("webhook", &webhook),
    ))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = state.orchestrator.registry.get(&id).await?;
    Ok(Json(
        ApiResponse::timed(def, start)
            .with_link("executions", &format!("/api/v1/executions?workflow_id={id}")),
    ))
}

/// PUT /api/v1/workflows/{id}
pub async fn update_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
    Json(update): Json<WorkflowUpdate>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let def = state.orchestrator.registry.update(&id, update).await?;
    Ok(Json(ApiResponse::timed(def, start)))
}

/// DELETE /api/v1/workflows/{id}
///
/// Soft delete: the definition is deactivated and keeps its history.
pub async fn delete_workflow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let changed = state
        .orchestrator
        .registry
        .deactivate(&id, "deleted via api")
        .await?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "id": id, "deactivated": changed }),
        start,
    )))
}

/// POST /api/v1/workflows/sync
pub async fn sync_workflows(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<SyncReport>>, AppError> {
    let start = Instant::now();
    let engine = state.orchestrator.executor.engine();
    let report = state.orchestrator.registry.sync(engine.as_ref()).await?;
    Ok(Json(ApiResponse::timed(report, start)))
}
