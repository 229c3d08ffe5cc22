//! Monitoring event queries and the dashboard summary.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;
use leadflow_types::monitoring::{DashboardSummary, MonitoringEvent};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::{EventQuery, WindowQuery};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/events
pub async fn query_events(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<EventQuery>,
) -> Result<Json<ApiResponse<Vec<MonitoringEvent>>>, AppError> {
    let start = Instant::now();
    let filter = query.into_filter()?;
    let events = state.orchestrator.monitor.query(&filter).await?;
    Ok(Json(ApiResponse::timed(events, start)))
}

/// GET /api/v1/events/errors
pub async fn recent_errors(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ApiResponse<Vec<MonitoringEvent>>>, AppError> {
    let start = Instant::now();
    let since = Utc::now() - query.window()?;
    let events = state.orchestrator.monitor.errors(since, query.limit()).await?;
    Ok(Json(
        ApiResponse::timed(events, start).with_link("dashboard", "/api/v1/dashboard"),
    ))
}

/// GET /api/v1/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ApiResponse<DashboardSummary>>, AppError> {
    let start = Instant::now();
    let summary = state.orchestrator.dashboard(query.window()?).await?;
    Ok(Json(ApiResponse::timed(summary, start)))
}
