//! Queued webhook inspection and cancellation.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use leadflow_types::webhook::QueuedWebhook;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::WebhookListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/webhooks
pub async fn list_webhooks(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<WebhookListQuery>,
) -> Result<Json<ApiResponse<Vec<QueuedWebhook>>>, AppError> {
    let start = Instant::now();
    let (status, limit) = query.parts()?;
    let webhooks = state.orchestrator.queue.list(status, limit).await?;
    Ok(Json(ApiResponse::timed(webhooks, start)))
}

/// GET /api/v1/webhooks/{id}
pub async fn get_webhook(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<QueuedWebhook>>, AppError> {
    let start = Instant::now();
    let webhook = state
        .orchestrator
        .queue
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("webhook {id} not found")))?;
    Ok(Json(
        ApiResponse::timed(webhook, start)
            .with_link("executions", "/api/v1/executions"),
    ))
}

/// POST /api/v1/webhooks/{id}/cancel
///
/// Only a `queued` row can be cancelled; anything else answers `409`.
pub async fn cancel_webhook(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<QueuedWebhook>>, AppError> {
    let start = Instant::now();
    let queue = &state.orchestrator.queue;
    let current = queue
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("webhook {id} not found")))?;

    if !queue.cancel(&id).await? {
        return Err(AppError::Conflict(format!(
            "webhook {id} is {} and cannot be cancelled",
            current.status
        )));
    }
    let cancelled = queue
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("webhook {id} not found")))?;
    Ok(Json(ApiResponse::timed(cancelled, start)))
}
