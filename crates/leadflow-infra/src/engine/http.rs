//! `HttpWorkflowEngine` -- [`WorkflowEngine`] over the engine's JSON REST API.
//!
//! Endpoints (relative to `engine.base_url`):
//! - `POST /workflows/{id}/run` with `{"execution_id", "data"}`
//! - `GET /executions/{id}`
//! - `POST /executions/{id}/stop`
//! - `GET /workflows`
//!
//! The API key travels in `X-API-Key` and is kept in a [`SecretString`].

use std::time::Duration;

use leadflow_core::engine::{EngineError, WorkflowEngine};
use leadflow_types::config::EngineConfig;
use leadflow_types::engine::{RemoteExecutionState, RemoteWorkflow, StartedExecution};
use leadflow_types::workflow::ExecutionResult;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use uuid::Uuid;

pub struct HttpWorkflowEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpWorkflowEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().map(SecretString::from),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, EngineError> {
        let response = self
            .authorized(request)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(alias = "id", alias = "executionId")]
    execution_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    status: String,
    #[serde(default, alias = "data")]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WorkflowList {
    Wrapped { data: Vec<RemoteWorkflow> },
    Bare(Vec<RemoteWorkflow>),
}

impl WorkflowEngine for HttpWorkflowEngine {
    async fn start_execution(
        &self,
        external_workflow_id: &str,
        execution_id: Uuid,
        input: &serde_json::Value,
    ) -> Result<StartedExecution, EngineError> {
        let url = self.url(&format!("/workflows/{external_workflow_id}/run"));
        let body = serde_json::json!({ "execution_id": execution_id, "data": input });

        let response = self.send(self.client.post(&url).json(&body)).await?;
        let parsed: StartResponse = response.json().await.map_err(|e| {
            EngineError::Transient(format!("unreadable start response: {e}"))
        })?;

        let external_execution_id = match parsed.execution_id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        tracing::debug!(%execution_id, external_execution_id = %external_execution_id, "engine accepted execution");
        Ok(StartedExecution {
            external_execution_id,
        })
    }

    async fn get_execution_status(
        &self,
        external_execution_id: &str,
    ) -> Result<RemoteExecutionState, EngineError> {
        let url = self.url(&format!("/executions/{external_execution_id}"));
        let response = match self.send(self.client.get(&url)).await {
            Ok(response) => response,
            Err(EngineError::Permanent { status: 404, .. }) => {
                return Ok(RemoteExecutionState::Unknown);
            }
            Err(e) => return Err(e),
        };
        let parsed: ExecutionResponse = response.json().await.map_err(|e| {
            EngineError::Transient(format!("unreadable execution response: {e}"))
        })?;
        Ok(remote_state(parsed))
    }

    async fn cancel_execution(&self, external_execution_id: &str) -> Result<(), EngineError> {
        let url = self.url(&format!("/executions/{external_execution_id}/stop"));
        match self.send(self.client.post(&url)).await {
            // Already gone on the engine side: nothing left to stop.
            Ok(_) | Err(EngineError::Permanent { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<RemoteWorkflow>, EngineError> {
        let response = self.send(self.client.get(self.url("/workflows"))).await?;
        let list: WorkflowList = response.json().await.map_err(|e| {
            EngineError::Transient(format!("unreadable workflow list: {e}"))
        })?;
        Ok(match list {
            WorkflowList::Wrapped { data } => data,
            WorkflowList::Bare(data) => data,
        })
    }
}

fn transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout
    } else {
        EngineError::Transient(e.to_string())
    }
}

/// 5xx and 429 are worth retrying; any other non-success status is final.
fn status_error(status: StatusCode, body: &str) -> EngineError {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("no body").to_string()
    } else {
        body.chars().take(500).collect()
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        EngineError::Transient(format!("HTTP {}: {message}", status.as_u16()))
    } else {
        EngineError::Permanent {
            status: status.as_u16(),
            message,
        }
    }
}

fn remote_state(response: ExecutionResponse) -> RemoteExecutionState {
    match response.status.to_lowercase().as_str() {
        "success" | "succeeded" | "completed" => RemoteExecutionState::Finished {
            result: ExecutionResult::Success {
                output: response.output,
            },
        },
        "error" | "failed" | "crashed" | "canceled" | "cancelled" => {
            let error = match response.error {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Null) | None => Some(format!("engine reported {}", response.status)),
                Some(other) => Some(other.to_string()),
            };
            RemoteExecutionState::Finished {
                result: ExecutionResult::Error { error },
            }
        }
        _ => RemoteExecutionState::Running,
    }
}
