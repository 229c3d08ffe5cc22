//! Engine completion callback.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use leadflow_core::executor::ReconcileOutcome;
use leadflow_types::monitoring::{EventRefs, EventType};
use leadflow_types::workflow::ExecutionResult;
use serde_json::json;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /executions/{id}/complete
///
/// Body: `{"status": "success"|"error", "output"?, "error"?}`. A repeated
/// callback for a finished execution is acknowledged without effect.
pub async fn complete_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<ReconcileOutcome>>, AppError> {
    let start = Instant::now();

    if let Err(e) = state.secrets.verify_callback(&headers, &body) {
        tracing::warn!(execution_id = %id, error = %e, "engine callback rejected");
        state
            .orchestrator
            .monitor
            .warning(
                EventType::WebhookRejected,
                EventRefs {
                    execution_id: Some(id),
                    ..Default::default()
                },
                json!({ "route": "callback", "reason": e.to_string() }),
            )
            .await;
        return Err(AppError::Unauthorized(e.to_string()));
    }

    let result: ExecutionResult = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid callback body: {e}")))?;

    let outcome = state.orchestrator.executor.reconcile(id, result).await?;
    if let ReconcileOutcome::AlreadyTerminal { status } = outcome {
        tracing::debug!(execution_id = %id, %status, "duplicate engine callback ignored");
    }

    Ok(Json(
        ApiResponse::timed(outcome, start).with_link("execution", &format!("/api/v1/executions/{id}")),
    ))
}
