//! Workflow executor: creates executions, drives them through the external
//! engine, and reconciles their results.
//!
//! Engine calls never run on the queue-processing path. `spawn_start` hands
//! each start to its own task with a per-call timeout, and in-flight starts
//! are tracked by cancellation token so an operator cancel can abort them.
//!
//! Every status change is a guarded transition in storage; the in-memory
//! token map only short-circuits work, it never decides state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use leadflow_types::approval::{ApprovalRequest, ApprovalStatus, Decision};
use leadflow_types::config::OrchestratorConfig;
use leadflow_types::engine::RemoteExecutionState;
use leadflow_types::error::{ErrorKind, RepositoryError};
use leadflow_types::monitoring::{EventRefs, EventType};
use leadflow_types::workflow::{
    failure_reason, ExecutionFilter, ExecutionResult, ExecutionStatus, WorkflowDefinition,
    WorkflowExecution,
};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::approval::open_request;
use crate::backoff::RetryPolicy;
use crate::engine::{EngineError, WorkflowEngine};
use crate::monitor::EventMonitor;
use crate::registry::{RegistryError, WorkflowRegistry};
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::workflow::{ExecutionTransition, WorkflowRepository};

/// Decision reason and event cause for approvals closed by a cancel.
pub const EXECUTION_CANCELLED: &str = "execution_cancelled";

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("cannot {action} execution in status '{status}'")]
    InvalidTransition {
        status: ExecutionStatus,
        action: &'static str,
    },

    #[error("execution {id} already retried {retry_count} times (max {max})")]
    RetryLimit { id: Uuid, retry_count: u32, max: u32 },

    #[error("execution {0} changed concurrently")]
    Conflict(Uuid),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::NotFound(_) | ExecutorError::WorkflowNotFound(_) => ErrorKind::NotFound,
            ExecutorError::InvalidTransition { .. } | ExecutorError::RetryLimit { .. } => {
                ErrorKind::Validation
            }
            ExecutorError::Conflict(_) => ErrorKind::Conflict,
            ExecutorError::Registry(e) => e.kind(),
            ExecutorError::Repository(e) => e.kind(),
        }
    }
}

/// What `trigger` did for one matching definition.
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// No approval needed. The caller should `spawn_start` it.
    ReadyToStart {
        execution: WorkflowExecution,
        definition: WorkflowDefinition,
    },
    /// Parked behind an approval request.
    AwaitingApproval {
        execution: WorkflowExecution,
        definition: WorkflowDefinition,
        approval: ApprovalRequest,
    },
}

impl TriggerOutcome {
    pub fn execution(&self) -> &WorkflowExecution {
        match self {
            TriggerOutcome::ReadyToStart { execution, .. }
            | TriggerOutcome::AwaitingApproval { execution, .. } => execution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { external_execution_id: String },
    /// The engine refused the start. The execution is `failed`.
    Rejected { error: String },
    /// Every attempt failed transiently. The execution is `failed`.
    Unavailable { error: String },
    /// The execution was no longer `pending` when the start ran or landed.
    Skipped { status: ExecutionStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied { status: ExecutionStatus },
    /// Duplicate or late signal for a finished execution. A no-op.
    AlreadyTerminal { status: ExecutionStatus },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub execution: WorkflowExecution,
    /// Whether the engine acknowledged the cancel. Advisory only.
    pub engine_notified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub checked: u32,
    pub completed: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub still_running: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub checked: u32,
    /// Approved or ungated executions handed back to `start`.
    pub restarted: u32,
    /// Executions whose approval was rejected or expired.
    pub failed: u32,
    /// Gated executions that never got an approval request.
    pub gated: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Restart,
    Failed,
    Gated,
    Untouched,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Timeout for a single engine call.
    pub request_timeout: Duration,
    /// Attempts per start before giving up on a transient engine failure.
    pub start_attempts: u32,
    /// Delay between start attempts.
    pub start_backoff: RetryPolicy,
    /// A `running` execution older than this is failed with `timeout`.
    pub execution_timeout: Duration,
    /// Lifetime of approval requests opened by `trigger` and `retry`.
    pub approval_expiry: chrono::Duration,
    /// Maximum length of a retry chain.
    pub max_retries: u32,
    /// Age after which an unattended `pending` execution is recovered.
    pub pending_grace: Duration,
}

impl ExecutorSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.engine.request_timeout_secs),
            start_attempts: config.engine.start_attempts.max(1),
            start_backoff: RetryPolicy::from_config(&config.queue),
            execution_timeout: Duration::from_secs(config.engine.execution_timeout_secs),
            approval_expiry: chrono::Duration::hours(config.approval.default_expiry_hours),
            max_retries: config.queue.max_retries,
            pending_grace: Duration::from_secs(config.engine.pending_grace_secs),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

pub struct WorkflowExecutor<W, A, M, E>
where
    W: WorkflowRepository,
    A: ApprovalRepository,
    M: MonitoringRepository,
    E: WorkflowEngine,
{
    registry: Arc<WorkflowRegistry<W, M>>,
    workflows: Arc<W>,
    approvals: Arc<A>,
    monitor: Arc<EventMonitor<M>>,
    engine: Arc<E>,
    settings: ExecutorSettings,
    in_flight: DashMap<Uuid, CancellationToken>,
}

impl<W, A, M, E> WorkflowExecutor<W, A, M, E>
where
    W: WorkflowRepository + 'static,
    A: ApprovalRepository + 'static,
    M: MonitoringRepository + 'static,
    E: WorkflowEngine + 'static,
{
    pub fn new(
        registry: Arc<WorkflowRegistry<W, M>>,
        workflows: Arc<W>,
        approvals: Arc<A>,
        monitor: Arc<EventMonitor<M>>,
        engine: Arc<E>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            workflows,
            approvals,
            monitor,
            engine,
            settings,
            in_flight: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Number of starts currently waiting on the engine.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    // -- trigger ------------------------------------------------------------

    /// Create one `pending` execution per matching active definition.
    ///
    /// With `target` set only that definition is considered (the webhook
    /// arrived on its route), otherwise every definition subscribed to
    /// `event`. Definitions that require approval get an approval request
    /// and are not started here.
    pub async fn trigger(
        &self,
        event: &str,
        payload: serde_json::Value,
        webhook_id: Option<Uuid>,
        target: Option<Uuid>,
    ) -> Result<Vec<TriggerOutcome>, ExecutorError> {
        let definitions = match target {
            Some(id) => match self.workflows.get_definition(&id).await? {
                Some(def) if def.is_active => vec![def],
                Some(_) | None => Vec::new(),
            },
            None => self.registry.resolve(event).await?,
        };

        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let execution = WorkflowExecution::pending(&definition, payload.clone(), webhook_id);
            outcomes.push(self.open(definition, execution).await?);
        }
        Ok(outcomes)
    }

    /// Persist a fresh `pending` execution and gate it if required.
    async fn open(
        &self,
        definition: WorkflowDefinition,
        execution: WorkflowExecution,
    ) -> Result<TriggerOutcome, ExecutorError> {
        self.workflows.create_execution(&execution).await?;

        tracing::info!(
            execution_id = %execution.id,
            workflow = %definition.name,
            requires_approval = definition.requires_approval,
            "execution created"
        );
        self.monitor
            .info(
                EventType::ExecutionCreated,
                EventRefs::execution(definition.id, execution.id).with_webhook(execution.webhook_id),
                json!({ "workflow": definition.name, "retry_of": execution.retry_of }),
            )
            .await;

        if definition.requires_approval {
            let approval = open_request(
                self.approvals.as_ref(),
                self.monitor.as_ref(),
                &execution,
                definition.approval_type,
                definition.approval_priority,
                self.settings.approval_expiry,
            )
            .await?;
            Ok(TriggerOutcome::AwaitingApproval {
                execution,
                definition,
                approval,
            })
        } else {
            Ok(TriggerOutcome::ReadyToStart {
                execution,
                definition,
            })
        }
    }

    // -- start --------------------------------------------------------------

    /// Run `start` on its own task. The task can be aborted by `cancel`.
    pub fn spawn_start(self: &Arc<Self>, execution_id: Uuid) -> JoinHandle<()> {
        let token = CancellationToken::new();
        self.in_flight.insert(execution_id, token.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(%execution_id, "start aborted by cancel");
                }
                result = this.start(execution_id) => {
                    if let Err(e) = result {
                        tracing::error!(%execution_id, error = %e, "execution start failed");
                        this.monitor
                            .critical(
                                EventType::ExecutionFailed,
                                EventRefs { execution_id: Some(execution_id), ..Default::default() },
                                json!({ "error": e.to_string(), "stage": "start" }),
                            )
                            .await;
                    }
                }
            }
            this.in_flight.remove(&execution_id);
        })
    }

    /// Call the engine for a `pending` execution and record the result.
    ///
    /// Transient failures are retried in-call up to `start_attempts`. A
    /// permanent rejection or exhausted retries fail the execution.
    pub async fn start(&self, execution_id: Uuid) -> Result<StartOutcome, ExecutorError> {
        let execution = self.load(&execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            return Ok(StartOutcome::Skipped {
                status: execution.status,
            });
        }
        let definition = self
            .workflows
            .get_definition(&execution.workflow_id)
            .await?
            .ok_or(ExecutorError::WorkflowNotFound(execution.workflow_id))?;

        let mut attempt = 0u32;
        let last_error = loop {
            attempt += 1;
            let call = self.engine.start_execution(
                &definition.external_workflow_id,
                execution.id,
                &execution.input,
            );
            let result = match tokio::time::timeout(self.settings.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout),
            };

            match result {
                Ok(started) => {
                    return self
                        .mark_running(&execution, started.external_execution_id)
                        .await;
                }
                Err(EngineError::Permanent { status, message }) => {
                    let error = format!("engine rejected start ({status}): {message}");
                    self.fail(&execution, &[ExecutionStatus::Pending], &error).await?;
                    return Ok(StartOutcome::Rejected { error });
                }
                Err(e) if attempt < self.settings.start_attempts => {
                    let delay = self.settings.start_backoff.delay_for(attempt);
                    tracing::warn!(
                        %execution_id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "engine start failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        let error = match last_error {
            EngineError::Timeout => failure_reason::ENGINE_TIMEOUT.to_string(),
            other => other.to_string(),
        };
        self.fail(&execution, &[ExecutionStatus::Pending], &error).await?;
        Ok(StartOutcome::Unavailable { error })
    }

    async fn mark_running(
        &self,
        execution: &WorkflowExecution,
        external_id: String,
    ) -> Result<StartOutcome, ExecutorError> {
        let moved = self
            .workflows
            .transition_execution(
                &execution.id,
                &[ExecutionStatus::Pending],
                &ExecutionTransition::started(external_id.clone(), Utc::now()),
            )
            .await?;

        if !moved {
            // Cancelled while the start was in flight: the local state wins.
            let current = self.load(&execution.id).await?;
            tracing::warn!(
                execution_id = %execution.id,
                status = %current.status,
                "engine accepted start for execution no longer pending"
            );
            let _ = self.notify_engine_cancel(&external_id).await;
            return Ok(StartOutcome::Skipped {
                status: current.status,
            });
        }

        tracing::info!(execution_id = %execution.id, external_id = %external_id, "execution running");
        self.monitor
            .info(
                EventType::ExecutionStarted,
                EventRefs::execution(execution.workflow_id, execution.id),
                json!({ "external_execution_id": external_id }),
            )
            .await;
        Ok(StartOutcome::Started {
            external_execution_id: external_id,
        })
    }

    // -- reconcile ----------------------------------------------------------

    /// Apply a terminal engine result exactly once.
    ///
    /// A second signal for an already-terminal execution is a no-op. A
    /// success for an execution that never reached `running` is refused.
    pub async fn reconcile(
        &self,
        execution_id: Uuid,
        result: ExecutionResult,
    ) -> Result<ReconcileOutcome, ExecutorError> {
        let execution = self.load(&execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(ReconcileOutcome::AlreadyTerminal {
                status: execution.status,
            });
        }

        let target = result.target_status();
        if !execution.status.can_transition_to(target) {
            return Err(ExecutorError::InvalidTransition {
                status: execution.status,
                action: "complete",
            });
        }

        let now = Utc::now();
        let transition = match &result {
            ExecutionResult::Success { output } => {
                ExecutionTransition::finished(&execution, target, now).with_output(output.clone())
            }
            ExecutionResult::Error { error } => ExecutionTransition::finished(&execution, target, now)
                .with_error(error.clone().unwrap_or_else(|| "engine reported failure".into())),
        };

        let moved = self
            .workflows
            .transition_execution(&execution.id, &[execution.status], &transition)
            .await?;
        if !moved {
            let current = self.load(&execution_id).await?;
            return Ok(ReconcileOutcome::AlreadyTerminal {
                status: current.status,
            });
        }

        let refs = EventRefs::execution(execution.workflow_id, execution.id);
        match target {
            ExecutionStatus::Completed => {
                tracing::info!(%execution_id, duration_ms = ?transition.duration_ms, "execution completed");
                self.monitor
                    .info(
                        EventType::ExecutionCompleted,
                        refs,
                        json!({ "duration_ms": transition.duration_ms }),
                    )
                    .await;
            }
            _ => {
                tracing::warn!(%execution_id, error = ?transition.error_message, "execution failed");
                self.monitor
                    .error(
                        EventType::ExecutionFailed,
                        refs,
                        json!({ "error": transition.error_message }),
                    )
                    .await;
            }
        }
        Ok(ReconcileOutcome::Applied { status: target })
    }

    /// Poll the engine for `running` executions, longest-running first, and
    /// reconcile. Executions past `execution_timeout` are failed with
    /// `timeout`.
    pub async fn poll_running(&self, limit: u32) -> Result<PollReport, ExecutorError> {
        let running = self
            .workflows
            .list_oldest_executions(ExecutionStatus::Running, Utc::now(), limit)
            .await?;

        let timeout = chrono::Duration::from_std(self.settings.execution_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut report = PollReport::default();

        for execution in running {
            report.checked += 1;
            let began = execution.started_at.unwrap_or(execution.created_at);

            if Utc::now() - began > timeout {
                match self.time_out(&execution).await {
                    Ok(true) => report.timed_out += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(execution_id = %execution.id, error = %e, "timeout transition failed");
                        report.errors += 1;
                    }
                }
                continue;
            }

            let Some(external_id) = execution.external_execution_id.as_deref() else {
                report.still_running += 1;
                continue;
            };

            let polled = tokio::time::timeout(
                self.settings.request_timeout,
                self.engine.get_execution_status(external_id),
            )
            .await
            .unwrap_or(Err(EngineError::Timeout));

            match polled {
                Ok(RemoteExecutionState::Finished { result }) => {
                    match self.reconcile(execution.id, result).await {
                        Ok(ReconcileOutcome::Applied {
                            status: ExecutionStatus::Completed,
                        }) => report.completed += 1,
                        Ok(ReconcileOutcome::Applied { .. }) => report.failed += 1,
                        Ok(ReconcileOutcome::AlreadyTerminal { .. }) => {}
                        Err(e) => {
                            tracing::warn!(execution_id = %execution.id, error = %e, "reconcile from poll failed");
                            report.errors += 1;
                        }
                    }
                }
                Ok(RemoteExecutionState::Running) => report.still_running += 1,
                Ok(RemoteExecutionState::Unknown) => {
                    tracing::warn!(execution_id = %execution.id, %external_id, "engine has no record of execution");
                    report.still_running += 1;
                }
                Err(e) => {
                    tracing::warn!(execution_id = %execution.id, error = %e, "engine status poll failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Finish `pending` executions that nothing is driving any more.
    ///
    /// An execution older than `pending_grace` with no start in flight and no
    /// pending approval was orphaned between its commit and its start, or
    /// between an approval decision and the follow-up. Approved and ungated
    /// ones are started again, rejected and expired ones are failed, and a
    /// gated one without any request gets a fresh request.
    pub async fn recover_pending(self: &Arc<Self>, limit: u32) -> Result<RecoveryReport, ExecutorError> {
        let grace = chrono::Duration::from_std(self.settings.pending_grace)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let stalled = self
            .workflows
            .list_stalled_pending(Utc::now() - grace, limit)
            .await?;

        let mut report = RecoveryReport::default();
        let mut starts = Vec::new();
        for execution in stalled {
            if self.in_flight.contains_key(&execution.id) {
                continue;
            }
            report.checked += 1;
            match self.recover_one(&execution).await {
                Ok(Recovery::Restart) => {
                    report.restarted += 1;
                    starts.push(self.spawn_start(execution.id));
                }
                Ok(Recovery::Failed) => report.failed += 1,
                Ok(Recovery::Gated) => report.gated += 1,
                Ok(Recovery::Untouched) => {}
                Err(e) => {
                    tracing::warn!(execution_id = %execution.id, error = %e, "pending recovery failed");
                    report.errors += 1;
                }
            }
        }

        for start in starts {
            if let Err(e) = start.await {
                tracing::error!(error = %e, "recovered start task panicked");
            }
        }
        if report.checked > 0 {
            tracing::info!(
                checked = report.checked,
                restarted = report.restarted,
                failed = report.failed,
                gated = report.gated,
                "stalled pending executions recovered"
            );
        }
        Ok(report)
    }

    async fn recover_one(&self, execution: &WorkflowExecution) -> Result<Recovery, ExecutorError> {
        let approval = self.approvals.latest_for_execution(&execution.id).await?;
        let recovery = match approval.as_ref().map(|a| a.status) {
            Some(ApprovalStatus::Pending) => Recovery::Untouched,
            Some(ApprovalStatus::Approved) => Recovery::Restart,
            Some(ApprovalStatus::Rejected) => {
                self.fail_recovered(execution, failure_reason::APPROVAL_REJECTED)
                    .await?
            }
            Some(ApprovalStatus::Expired) => {
                self.fail_recovered(execution, failure_reason::APPROVAL_EXPIRED)
                    .await?
            }
            None => {
                let definition = self
                    .workflows
                    .get_definition(&execution.workflow_id)
                    .await?
                    .ok_or(ExecutorError::WorkflowNotFound(execution.workflow_id))?;
                if definition.requires_approval {
                    match open_request(
                        self.approvals.as_ref(),
                        self.monitor.as_ref(),
                        execution,
                        definition.approval_type,
                        definition.approval_priority,
                        self.settings.approval_expiry,
                    )
                    .await
                    {
                        Ok(_) => Recovery::Gated,
                        // Someone opened one since the listing.
                        Err(RepositoryError::Conflict(_)) => Recovery::Untouched,
                        Err(e) => return Err(e.into()),
                    }
                } else {
                    Recovery::Restart
                }
            }
        };

        let action = match recovery {
            Recovery::Restart => "restart",
            Recovery::Failed => "fail",
            Recovery::Gated => "request_approval",
            Recovery::Untouched => return Ok(recovery),
        };
        self.monitor
            .warning(
                EventType::ExecutionRecovered,
                EventRefs::execution(execution.workflow_id, execution.id),
                json!({
                    "action": action,
                    "approval_status": approval.map(|a| a.status),
                    "created_at": execution.created_at,
                }),
            )
            .await;
        Ok(recovery)
    }

    async fn fail_recovered(
        &self,
        execution: &WorkflowExecution,
        reason: &str,
    ) -> Result<Recovery, ExecutorError> {
        let moved = self.fail(execution, &[ExecutionStatus::Pending], reason).await?;
        Ok(if moved { Recovery::Failed } else { Recovery::Untouched })
    }

    async fn time_out(&self, execution: &WorkflowExecution) -> Result<bool, ExecutorError> {
        let moved = self
            .fail(execution, &[ExecutionStatus::Running], failure_reason::TIMEOUT)
            .await?;
        if moved {
            self.monitor
                .error(
                    EventType::ExecutionTimeout,
                    EventRefs::execution(execution.workflow_id, execution.id),
                    json!({ "timeout_secs": self.settings.execution_timeout.as_secs() }),
                )
                .await;
            if let Some(external_id) = &execution.external_execution_id {
                let _ = self.notify_engine_cancel(external_id).await;
            }
        }
        Ok(moved)
    }

    // -- retry / cancel -----------------------------------------------------

    /// Start a fresh attempt of a `failed` execution. History is untouched.
    pub async fn retry(self: &Arc<Self>, execution_id: Uuid) -> Result<TriggerOutcome, ExecutorError> {
        let failed = self.load(&execution_id).await?;
        if failed.status != ExecutionStatus::Failed {
            return Err(ExecutorError::InvalidTransition {
                status: failed.status,
                action: "retry",
            });
        }
        if failed.retry_count >= self.settings.max_retries {
            return Err(ExecutorError::RetryLimit {
                id: execution_id,
                retry_count: failed.retry_count,
                max: self.settings.max_retries,
            });
        }
        let definition = self
            .workflows
            .get_definition(&failed.workflow_id)
            .await?
            .ok_or(ExecutorError::WorkflowNotFound(failed.workflow_id))?;

        let attempt = failed.retry_attempt();
        self.monitor
            .info(
                EventType::ExecutionRetried,
                EventRefs::execution(definition.id, failed.id),
                json!({ "new_execution_id": attempt.id, "retry_count": attempt.retry_count }),
            )
            .await;

        let outcome = self.open(definition, attempt).await?;
        if let TriggerOutcome::ReadyToStart { execution, .. } = &outcome {
            self.spawn_start(execution.id);
        }
        Ok(outcome)
    }

    /// Cancel a `pending` or `running` execution.
    ///
    /// Local cancellation is authoritative. The engine is told on a
    /// best-effort basis and may still finish the run; a late completion
    /// signal is then ignored because the execution is terminal.
    pub async fn cancel(&self, execution_id: Uuid, actor: &str) -> Result<CancelOutcome, ExecutorError> {
        let execution = self.load(&execution_id).await?;
        if execution.status.is_terminal() {
            return Err(ExecutorError::InvalidTransition {
                status: execution.status,
                action: "cancel",
            });
        }

        let transition = ExecutionTransition::finished(&execution, ExecutionStatus::Cancelled, Utc::now())
            .with_error(format!("cancelled by {actor}"));
        let moved = self
            .workflows
            .transition_execution(
                &execution_id,
                &[ExecutionStatus::Pending, ExecutionStatus::Running],
                &transition,
            )
            .await?;
        if !moved {
            return Err(ExecutorError::Conflict(execution_id));
        }

        if let Some((_, token)) = self.in_flight.remove(&execution_id) {
            token.cancel();
        }

        // Approval has no cancelled state: the request is closed as expired
        // and the event says why.
        if let Some(approval) = self.approvals.get_pending_for_execution(&execution_id).await? {
            let decision = Decision {
                status: ApprovalStatus::Expired,
                actor: actor.to_string(),
                reason: Some(EXECUTION_CANCELLED.to_string()),
                auto_approved: false,
                decided_at: Utc::now(),
            };
            if self.approvals.decide(&approval.id, &decision).await? {
                self.monitor
                    .info(
                        EventType::ApprovalExpired,
                        EventRefs::execution(execution.workflow_id, execution_id)
                            .with_approval(approval.id),
                        json!({ "cause": EXECUTION_CANCELLED, "actor": actor }),
                    )
                    .await;
            }
        }

        let engine_notified = match &execution.external_execution_id {
            Some(external_id) => self.notify_engine_cancel(external_id).await,
            None => false,
        };

        tracing::info!(%execution_id, %actor, engine_notified, "execution cancelled");
        self.monitor
            .info(
                EventType::ExecutionCancelled,
                EventRefs::execution(execution.workflow_id, execution_id),
                json!({ "actor": actor, "engine_notified": engine_notified }),
            )
            .await;

        Ok(CancelOutcome {
            execution: self.load(&execution_id).await?,
            engine_notified,
        })
    }

    /// Fail a `pending` execution whose approval was rejected or expired.
    pub async fn fail_pending(&self, execution_id: Uuid, reason: &str) -> Result<bool, ExecutorError> {
        let execution = self.load(&execution_id).await?;
        self.fail(&execution, &[ExecutionStatus::Pending], reason).await
    }

    // -- reads --------------------------------------------------------------

    pub async fn get(&self, execution_id: &Uuid) -> Result<WorkflowExecution, ExecutorError> {
        self.load(execution_id).await
    }

    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<WorkflowExecution>, ExecutorError> {
        Ok(self.workflows.list_executions(filter).await?)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(ExecutionStatus, u64)>, ExecutorError> {
        Ok(self.workflows.count_executions_by_status().await?)
    }

    // -- helpers ------------------------------------------------------------

    async fn load(&self, execution_id: &Uuid) -> Result<WorkflowExecution, ExecutorError> {
        self.workflows
            .get_execution(execution_id)
            .await?
            .ok_or(ExecutorError::NotFound(*execution_id))
    }

    async fn fail(
        &self,
        execution: &WorkflowExecution,
        from: &[ExecutionStatus],
        reason: &str,
    ) -> Result<bool, ExecutorError> {
        let transition = ExecutionTransition::finished(execution, ExecutionStatus::Failed, Utc::now())
            .with_error(reason);
        let moved = self
            .workflows
            .transition_execution(&execution.id, from, &transition)
            .await?;
        if moved {
            tracing::warn!(execution_id = %execution.id, %reason, "execution failed");
            self.monitor
                .error(
                    EventType::ExecutionFailed,
                    EventRefs::execution(execution.workflow_id, execution.id),
                    json!({ "error": reason }),
                )
                .await;
        }
        Ok(moved)
    }

    async fn notify_engine_cancel(&self, external_id: &str) -> bool {
        let call = self.engine.cancel_execution(external_id);
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(%external_id, error = %e, "engine cancel failed");
                false
            }
            Err(_) => {
                tracing::warn!(%external_id, "engine cancel timed out");
                false
            }
        }
    }
}
