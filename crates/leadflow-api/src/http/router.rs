//! Axum router configuration with middleware.
//!
//! Management routes live under `/api/v1/` and require an API key. Inbound
//! webhooks, engine callbacks and `/health` sit at the root and carry their
//! own verification.

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::extract::State;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflow definitions
        .route(
            "/workflows",
            get(handlers::workflow::list_workflows).post(handlers::workflow::create_workflow),
        )
        .route("/workflows/sync", post(handlers::workflow::sync_workflows))
        .route(
            "/workflows/{id}",
            get(handlers::workflow::get_workflow)
                .put(handlers::workflow::update_workflow)
                .delete(handlers::workflow::delete_workflow),
        )
        // Executions
        .route("/executions", get(handlers::execution::list_executions))
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route(
            "/executions/{id}/retry",
            post(handlers::execution::retry_execution),
        )
        .route(
            "/executions/{id}/cancel",
            post(handlers::execution::cancel_execution),
        )
        // Approvals
        .route("/approvals", get(handlers::approval::list_approvals))
        .route("/approvals/bulk", post(handlers::approval::bulk_decide))
        .route("/approvals/{id}", get(handlers::approval::get_approval))
        .route("/approvals/{id}/approve", post(handlers::approval::approve))
        .route("/approvals/{id}/reject", post(handlers::approval::reject))
        .route("/approvals/{id}/escalate", post(handlers::approval::escalate))
        // Webhook queue
        .route("/webhooks", get(handlers::queue::list_webhooks))
        .route("/webhooks/{id}", get(handlers::queue::get_webhook))
        .route("/webhooks/{id}/cancel", post(handlers::queue::cancel_webhook))
        // Monitoring
        .route("/events", get(handlers::event::query_events))
        .route("/events/errors", get(handlers::event::recent_errors))
        .route("/dashboard", get(handlers::event::dashboard));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/webhooks/generic", post(handlers::webhook::receive_generic))
        .route("/webhooks/{workflow}", post(handlers::webhook::receive_targeted))
        .route(
            "/executions/{id}/complete",
            post(handlers::callback::complete_execution),
        )
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - no auth required.
async fn health_check(State(state): State<AppState>) -> Response {
    match state.orchestrator.health().await {
        Ok(health) => axum::Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "queue_depth": health.queue_depth,
            "pending_approvals": health.pending_approvals,
            "recent_error_rate": health.recent_error_rate,
            "in_flight_starts": health.in_flight_starts,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(serde_json::json!({
                    "status": "degraded",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use leadflow_core::executor::TriggerOutcome;
    use leadflow_infra::webhook::signature::{EVENT_TYPE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, sign};
    use leadflow_types::approval::ApprovalType;
    use leadflow_types::config::OrchestratorConfig;
    use leadflow_types::monitoring::{EventFilter, EventType, Severity};
    use leadflow_types::workflow::NewWorkflowDefinition;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::http::extractors::auth::create_api_key;

    const SECRET: &str = "test-secret";

    async fn test_state() -> (AppState, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = OrchestratorConfig::default();
        config.webhook.default_secret = Some(SECRET.to_string());
        // Nothing listens here; tests never wait on the engine.
        config.engine.base_url = "http://127.0.0.1:9/api/v1".to_string();
        let state = AppState::build(tmp.path().to_path_buf(), config).await.unwrap();
        (state, tmp)
    }

    fn signed(uri: &str, body: &Value, secret: &str) -> Request<Body> {
        let raw = serde_json::to_vec(body).unwrap();
        let ts = chrono::Utc::now().timestamp();
        Request::post(uri)
            .header("content-type", "application/json")
            .header(EVENT_TYPE_HEADER, "lead.created")
            .header(TIMESTAMP_HEADER, ts.to_string())
            .header(SIGNATURE_HEADER, sign(secret.as_bytes(), ts, &raw))
            .body(Body::from(raw))
            .unwrap()
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_operational_numbers() {
        let (state, _tmp) = test_state().await;
        let (status, body) = call(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["queue_depth"], 0);
        assert_eq!(body["pending_approvals"], 0);
    }

    #[tokio::test]
    async fn signed_webhook_is_queued_once() {
        let (state, _tmp) = test_state().await;
        let payload = json!({"lead_id": 42, "email": "a@example.com"});

        let (status, first) = call(&state, signed("/webhooks/generic", &payload, SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["accepted"], true);
        assert_eq!(first["duplicate"], false);

        let (_, second) = call(&state, signed("/webhooks/generic", &payload, SECRET)).await;
        assert_eq!(second["accepted"], true);
        assert_eq!(second["duplicate"], true);
        assert_eq!(second["webhook_id"], first["webhook_id"]);

        assert_eq!(state.orchestrator.queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_acknowledged_but_dropped() {
        let (state, _tmp) = test_state().await;
        let (status, body) = call(
            &state,
            signed("/webhooks/generic", &json!({"lead_id": 1}), "wrong-secret"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"accepted": false}));
        assert_eq!(state.orchestrator.queue.depth().await.unwrap(), 0);

        let rejected = state
            .orchestrator
            .monitor
            .query(&EventFilter {
                event_type: Some(EventType::WebhookRejected),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
    }

    async fn rejections(state: &AppState) -> Vec<leadflow_types::monitoring::MonitoringEvent> {
        state
            .orchestrator
            .monitor
            .query(&EventFilter {
                event_type: Some(EventType::WebhookRejected),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn scalar_payload_is_rejected_as_invalid() {
        let (state, _tmp) = test_state().await;
        let (status, body) = call(&state, signed("/webhooks/generic", &json!(42), SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"accepted": false}));

        let rejected = rejections(&state).await;
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].severity, Severity::Warning);
        assert!(
            rejected[0].payload["reason"]
                .as_str()
                .unwrap()
                .contains("payload must be a JSON object or array")
        );
    }

    #[tokio::test]
    async fn storage_failure_on_enqueue_is_critical() {
        let (state, _tmp) = test_state().await;
        sqlx::query("DROP TABLE webhook_queue")
            .execute(&state.db_pool.writer)
            .await
            .unwrap();

        let (status, body) = call(&state, signed("/webhooks/generic", &json!({"lead_id": 5}), SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"accepted": false}));

        let rejected = rejections(&state).await;
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].severity, Severity::Critical);
        assert_eq!(rejected[0].payload["reason"], "enqueue_failed");
    }

    #[tokio::test]
    async fn targeted_webhook_resolves_workflow_by_name() {
        let (state, _tmp) = test_state().await;
        let def = state
            .orchestrator
            .registry
            .create(NewWorkflowDefinition {
                name: "lead-nurture".into(),
                description: None,
                external_workflow_id: "wf-1".into(),
                trigger_events: vec!["lead.created".into()],
                requires_approval: false,
                approval_type: ApprovalType::General,
                approval_priority: Default::default(),
                auto_approval_enabled: false,
                auto_approval_daily_cap: None,
            })
            .await
            .unwrap();

        let (_, body) = call(&state, signed("/webhooks/lead-nurture", &json!({"lead_id": 7}), SECRET)).await;
        assert_eq!(body["accepted"], true);
        let id: uuid::Uuid = body["webhook_id"].as_str().unwrap().parse().unwrap();
        let row = state.orchestrator.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(row.target_workflow_id, Some(def.id));

        let (_, unknown) = call(&state, signed("/webhooks/no-such-flow", &json!({"lead_id": 7}), SECRET)).await;
        assert_eq!(unknown["accepted"], false);
    }

    #[tokio::test]
    async fn management_api_requires_a_key() {
        let (state, _tmp) = test_state().await;
        let (status, body) = call(&state, Request::get("/api/v1/workflows").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");

        let key = create_api_key(&state, "test").await.unwrap();
        let (status, body) = call(
            &state,
            Request::get("/api/v1/workflows")
                .header("authorization", format!("Bearer {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
        assert!(body["meta"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn second_decision_conflicts() {
        let (state, _tmp) = test_state().await;
        let key = create_api_key(&state, "test").await.unwrap();
        let def = state
            .orchestrator
            .registry
            .create(NewWorkflowDefinition {
                name: "bulk-campaign".into(),
                description: None,
                external_workflow_id: "wf-2".into(),
                trigger_events: vec!["campaign.launched".into()],
                requires_approval: true,
                approval_type: ApprovalType::BulkSend,
                approval_priority: Default::default(),
                auto_approval_enabled: false,
                auto_approval_daily_cap: None,
            })
            .await
            .unwrap();
        let outcome = state
            .orchestrator
            .executor
            .trigger("campaign.launched", json!({}), None, Some(def.id))
            .await
            .unwrap()
            .remove(0);
        let TriggerOutcome::AwaitingApproval { approval, .. } = outcome else {
            panic!("expected an approval request");
        };

        let decide = |action: &str| {
            Request::post(format!("/api/v1/approvals/{}/{action}", approval.id))
                .header("x-api-key", key.clone())
                .header("content-type", "application/json")
                .body(Body::from(r#"{"actor":"alice","reason":"list not cleaned"}"#))
                .unwrap()
        };

        let (status, body) = call(&state, decide("reject")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "rejected");
        assert_eq!(body["data"]["decided_by"], "alice");

        let (status, body) = call(&state, decide("approve")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn callback_validates_body_and_execution() {
        let (state, _tmp) = test_state().await;
        let missing = uuid::Uuid::now_v7();

        let (status, _) = call(
            &state,
            Request::post(format!("/executions/{missing}/complete"))
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &state,
            Request::post(format!("/executions/{missing}/complete"))
                .body(Body::from(r#"{"status":"success","output":{"sent":3}}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");
    }
}
