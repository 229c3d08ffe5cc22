//! Inbound webhook receivers.
//!
//! Both routes always answer `200` so senders never retry a rejected
//! delivery. The body says whether the event was queued. Rejections are
//! logged and recorded as `webhook.rejected` warnings, or as `critical` when
//! storage failed to take a verified delivery.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use leadflow_infra::webhook::Route;
use leadflow_types::error::ErrorKind;
use leadflow_types::monitoring::{EventRefs, EventType};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

impl WebhookAck {
    fn rejected() -> Self {
        Self {
            accepted: false,
            webhook_id: None,
            duplicate: None,
        }
    }
}

/// POST /webhooks/generic
pub async fn receive_generic(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookAck> {
    Json(accept(&state, Route::Generic, None, &headers, &body).await)
}

/// POST /webhooks/{workflow} where `workflow` is a definition id or name.
pub async fn receive_targeted(
    State(state): State<AppState>,
    Path(workflow): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<WebhookAck> {
    let definition = match state.orchestrator.registry.resolve_target(&workflow).await {
        Ok(Some(def)) => def,
        Ok(None) => {
            reject(&state, &workflow, EventRefs::default(), "unknown workflow").await;
            return Json(WebhookAck::rejected());
        }
        Err(e) => {
            tracing::error!(workflow = %workflow, error = %e, "workflow lookup failed");
            return Json(WebhookAck::rejected());
        }
    };

    let route = Route::Targeted {
        workflow_name: definition.name.clone(),
    };
    Json(accept(&state, route, Some(definition.id), &headers, &body).await)
}

async fn accept(
    state: &AppState,
    route: Route,
    target: Option<Uuid>,
    headers: &HeaderMap,
    body: &[u8],
) -> WebhookAck {
    let envelope = match state.secrets.verify_request(&route, headers, body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let refs = target.map(EventRefs::workflow).unwrap_or_default();
            reject(state, route.label(), refs, &e.to_string()).await;
            return WebhookAck::rejected();
        }
    };

    let webhook = envelope.into_new_webhook(target, state.config.queue.max_retries);
    match state.orchestrator.queue.enqueue(webhook).await {
        Ok(outcome) => WebhookAck {
            accepted: true,
            webhook_id: Some(outcome.id),
            duplicate: Some(outcome.duplicate),
        },
        Err(e) if e.kind() == ErrorKind::Validation => {
            let refs = target.map(EventRefs::workflow).unwrap_or_default();
            reject(state, route.label(), refs, &e.to_string()).await;
            WebhookAck::rejected()
        }
        Err(e) => {
            // A verified delivery was lost on our side.
            tracing::error!(route = route.label(), error = %e, "failed to enqueue webhook");
            state
                .orchestrator
                .monitor
                .critical(
                    EventType::WebhookRejected,
                    target.map(EventRefs::workflow).unwrap_or_default(),
                    json!({ "route": route.label(), "reason": "enqueue_failed", "error": e.to_string() }),
                )
                .await;
            WebhookAck::rejected()
        }
    }
}

async fn reject(state: &AppState, route: &str, refs: EventRefs, reason: &str) {
    tracing::warn!(route, reason, "webhook rejected");
    state
        .orchestrator
        .monitor
        .warning(
            EventType::WebhookRejected,
            refs,
            json!({ "route": route, "reason": reason }),
        )
        .await;
}
