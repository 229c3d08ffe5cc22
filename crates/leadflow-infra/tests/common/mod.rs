//! Shared harness: a temp-file SQLite database, the SQLite repositories and a
//! scripted in-memory workflow engine.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use leadflow_core::approval::auto::{ConfidenceScorer, RuleBasedScorer};
use leadflow_core::backoff::RetryPolicy;
use leadflow_core::engine::{EngineError, WorkflowEngine};
use leadflow_core::executor::ExecutorSettings;
use leadflow_core::orchestrator::{Orchestrator, Repositories};
use leadflow_infra::sqlite::approval::SqliteApprovalRepository;
use leadflow_infra::sqlite::monitoring::SqliteMonitoringRepository;
use leadflow_infra::sqlite::pool::DatabasePool;
use leadflow_infra::sqlite::webhook_queue::SqliteWebhookQueueRepository;
use leadflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use leadflow_types::approval::{ApprovalPriority, ApprovalStatus, ApprovalType};
use leadflow_types::config::OrchestratorConfig;
use leadflow_types::engine::{RemoteExecutionState, RemoteWorkflow, StartedExecution};
use leadflow_types::workflow::{
    ExecutionStatus, NewWorkflowDefinition, WorkflowDefinition, WorkflowExecution,
};
use uuid::Uuid;

pub type TestOrchestrator = Orchestrator<
    SqliteWebhookQueueRepository,
    SqliteWorkflowRepository,
    SqliteApprovalRepository,
    SqliteMonitoringRepository,
    ScriptedEngine,
>;

// ---------------------------------------------------------------------------
// Scripted engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    start_replies: VecDeque<Result<StartedExecution, EngineError>>,
    statuses: HashMap<String, RemoteExecutionState>,
    workflows: Vec<RemoteWorkflow>,
    started: Vec<(String, Uuid)>,
    cancelled: Vec<String>,
    start_delay: Option<Duration>,
}

/// In-memory engine. Start calls consume scripted replies first and then
/// succeed with `ext-{n}`; unscripted executions report `running`.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
    counter: Arc<AtomicU32>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_start_reply(&self, reply: Result<StartedExecution, EngineError>) {
        self.script.lock().unwrap().start_replies.push_back(reply);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.script.lock().unwrap().start_delay = Some(delay);
    }

    pub fn set_status(&self, external_id: &str, state: RemoteExecutionState) {
        self.script
            .lock()
            .unwrap()
            .statuses
            .insert(external_id.to_string(), state);
    }

    pub fn set_workflows(&self, workflows: Vec<RemoteWorkflow>) {
        self.script.lock().unwrap().workflows = workflows;
    }

    pub fn start_calls(&self) -> usize {
        self.script.lock().unwrap().started.len()
    }

    pub fn started_executions(&self) -> Vec<Uuid> {
        self.script
            .lock()
            .unwrap()
            .started
            .iter()
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.script.lock().unwrap().cancelled.clone()
    }
}

impl WorkflowEngine for ScriptedEngine {
    async fn start_execution(
        &self,
        external_workflow_id: &str,
        execution_id: Uuid,
        _input: &serde_json::Value,
    ) -> Result<StartedExecution, EngineError> {
        let (reply, delay) = {
            let mut script = self.script.lock().unwrap();
            script
                .started
                .push((external_workflow_id.to_string(), execution_id));
            (script.start_replies.pop_front(), script.start_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Some(reply) => reply,
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(StartedExecution {
                    external_execution_id: format!("ext-{n}"),
                })
            }
        }
    }

    async fn get_execution_status(
        &self,
        external_execution_id: &str,
    ) -> Result<RemoteExecutionState, EngineError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .statuses
            .get(external_execution_id)
            .cloned()
            .unwrap_or(RemoteExecutionState::Running))
    }

    async fn cancel_execution(&self, external_execution_id: &str) -> Result<(), EngineError> {
        self.script
            .lock()
            .unwrap()
            .cancelled
            .push(external_execution_id.to_string());
        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<RemoteWorkflow>, EngineError> {
        Ok(self.script.lock().unwrap().workflows.clone())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<TestOrchestrator>,
    pub engine: ScriptedEngine,
    pub pool: DatabasePool,
}

pub async fn test_pool() -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let pool = DatabasePool::new(&url).await.unwrap();
    // Keep the directory alive for the duration of the test process.
    std::mem::forget(dir);
    pool
}

/// Settings with millisecond backoff so retries do not slow tests down.
pub fn fast_settings() -> ExecutorSettings {
    ExecutorSettings {
        request_timeout: Duration::from_secs(2),
        start_attempts: 3,
        start_backoff: RetryPolicy::new(vec![Duration::from_millis(5)]),
        execution_timeout: Duration::from_secs(3600),
        approval_expiry: chrono::Duration::hours(24),
        max_retries: 3,
        pending_grace: Duration::from_secs(600),
    }
}

pub async fn harness() -> Harness {
    harness_with(OrchestratorConfig::default(), fast_settings()).await
}

pub async fn harness_with(config: OrchestratorConfig, settings: ExecutorSettings) -> Harness {
    harness_with_scorer(config, settings, Arc::new(RuleBasedScorer::default())).await
}

pub async fn harness_with_scorer(
    config: OrchestratorConfig,
    settings: ExecutorSettings,
    scorer: Arc<dyn ConfidenceScorer>,
) -> Harness {
    let pool = test_pool().await;
    let engine = ScriptedEngine::new();
    let repos = Repositories {
        webhooks: SqliteWebhookQueueRepository::new(pool.clone()),
        workflows: SqliteWorkflowRepository::new(pool.clone()),
        approvals: SqliteApprovalRepository::new(pool.clone()),
        events: SqliteMonitoringRepository::new(pool.clone()),
    };
    let orchestrator = Arc::new(Orchestrator::with_settings(
        repos,
        engine.clone(),
        config,
        scorer,
        settings,
    ));
    Harness {
        orchestrator,
        engine,
        pool,
    }
}

pub fn definition(name: &str, events: &[&str]) -> NewWorkflowDefinition {
    NewWorkflowDefinition {
        name: name.to_string(),
        description: None,
        external_workflow_id: format!("wf-{name}"),
        trigger_events: events.iter().map(|e| e.to_string()).collect(),
        requires_approval: false,
        approval_type: ApprovalType::General,
        approval_priority: ApprovalPriority::Medium,
        auto_approval_enabled: false,
        auto_approval_daily_cap: None,
    }
}

pub fn gated_definition(name: &str, events: &[&str]) -> NewWorkflowDefinition {
    NewWorkflowDefinition {
        requires_approval: true,
        approval_type: ApprovalType::BulkSend,
        ..definition(name, events)
    }
}

impl Harness {
    pub async fn create(&self, def: NewWorkflowDefinition) -> WorkflowDefinition {
        self.orchestrator.registry.create(def).await.unwrap()
    }

    pub async fn execution(&self, id: Uuid) -> WorkflowExecution {
        self.orchestrator.executor.get(&id).await.unwrap()
    }

    /// Poll until the execution reaches `status` or two seconds pass.
    pub async fn wait_for_status(&self, id: Uuid, status: ExecutionStatus) -> WorkflowExecution {
        for _ in 0..200 {
            let execution = self.execution(id).await;
            if execution.status == status {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let execution = self.execution(id).await;
        panic!(
            "execution {id} stuck in {} waiting for {status}",
            execution.status
        );
    }

    /// Move an approval's deadline into the past.
    pub async fn backdate_approval(&self, approval_id: Uuid, expires_at: DateTime<Utc>) {
        sqlx::query("UPDATE approval_requests SET expires_at = ? WHERE id = ?")
            .bind(expires_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(approval_id.to_string())
            .execute(&self.pool.writer)
            .await
            .unwrap();
    }

    /// Pretend a worker claimed a webhook long ago and then died.
    pub async fn backdate_claim(&self, webhook_id: Uuid, claimed_at: DateTime<Utc>) {
        sqlx::query("UPDATE webhook_queue SET claimed_at = ? WHERE id = ?")
            .bind(claimed_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(webhook_id.to_string())
            .execute(&self.pool.writer)
            .await
            .unwrap();
    }

    /// Age an execution as if it were created at `created_at`.
    pub async fn backdate_creation(&self, execution_id: Uuid, created_at: DateTime<Utc>) {
        sqlx::query("UPDATE workflow_executions SET created_at = ? WHERE id = ?")
            .bind(created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .unwrap();
    }

    /// Set an approval's status directly, skipping everything a decision
    /// would normally trigger.
    pub async fn force_approval_status(&self, approval_id: Uuid, status: ApprovalStatus) {
        sqlx::query("UPDATE approval_requests SET status = ?, decided_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(approval_id.to_string())
            .execute(&self.pool.writer)
            .await
            .unwrap();
    }

    /// Run raw SQL on the writer connection.
    pub async fn exec(&self, sql: &str) {
        sqlx::query(sql).execute(&self.pool.writer).await.unwrap();
    }

    pub async fn backdate_start(&self, execution_id: Uuid, started_at: DateTime<Utc>) {
        sqlx::query("UPDATE workflow_executions SET started_at = ? WHERE id = ?")
            .bind(started_at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .unwrap();
    }
}
