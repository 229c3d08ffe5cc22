//! Wiring of every core service over one set of repositories and one engine.
//!
//! Both the HTTP server and the CLI hold an `Orchestrator` pinned to the
//! SQLite repositories and the HTTP engine client.

use std::sync::Arc;
use std::time::Duration;

use leadflow_types::config::OrchestratorConfig;
use leadflow_types::error::{ErrorKind, RepositoryError};
use leadflow_types::monitoring::DashboardSummary;
use serde::Serialize;

use crate::approval::auto::{AutoApprover, ConfidenceScorer};
use crate::approval::gate::{ApprovalError, ApprovalGate};
use crate::backoff::RetryPolicy;
use crate::dispatch::Dispatcher;
use crate::engine::WorkflowEngine;
use crate::executor::{ExecutorError, ExecutorSettings, WorkflowExecutor};
use crate::monitor::{EventMonitor, OperationalSnapshot};
use crate::queue::{QueueError, WebhookQueue};
use crate::registry::{RegistryError, WorkflowRegistry};
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::webhook::WebhookQueueRepository;
use crate::repository::workflow::WorkflowRepository;

/// Any service error surfaced through the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Queue(e) => e.kind(),
            OrchestratorError::Registry(e) => e.kind(),
            OrchestratorError::Executor(e) => e.kind(),
            OrchestratorError::Approval(e) => e.kind(),
            OrchestratorError::Repository(e) => e.kind(),
        }
    }
}

/// The four repositories the core needs.
pub struct Repositories<Q, W, A, M> {
    pub webhooks: Q,
    pub workflows: W,
    pub approvals: A,
    pub events: M,
}

/// Numbers reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub queue_depth: u64,
    pub pending_approvals: u64,
    pub recent_error_rate: f64,
    pub in_flight_starts: usize,
}

pub struct Orchestrator<Q, W, A, M, E>
where
    Q: WebhookQueueRepository,
    W: WorkflowRepository,
    A: ApprovalRepository,
    M: MonitoringRepository,
    E: WorkflowEngine,
{
    pub config: OrchestratorConfig,
    pub monitor: Arc<EventMonitor<M>>,
    pub queue: Arc<WebhookQueue<Q, M>>,
    pub registry: Arc<WorkflowRegistry<W, M>>,
    pub executor: Arc<WorkflowExecutor<W, A, M, E>>,
    pub gate: Arc<ApprovalGate<W, A, M, E>>,
    pub auto: Arc<AutoApprover<W, A, M, E>>,
    pub dispatcher: Arc<Dispatcher<Q, W, A, M, E>>,
}

impl<Q, W, A, M, E> Orchestrator<Q, W, A, M, E>
where
    Q: WebhookQueueRepository + 'static,
    W: WorkflowRepository + 'static,
    A: ApprovalRepository + 'static,
    M: MonitoringRepository + 'static,
    E: WorkflowEngine + 'static,
{
    pub fn new(
        repos: Repositories<Q, W, A, M>,
        engine: E,
        config: OrchestratorConfig,
        scorer: Arc<dyn ConfidenceScorer>,
    ) -> Self {
        Self::with_settings(repos, engine, config.clone(), scorer, ExecutorSettings::from_config(&config))
    }

    /// Like `new` but with explicit executor settings (short timeouts in tests).
    pub fn with_settings(
        repos: Repositories<Q, W, A, M>,
        engine: E,
        config: OrchestratorConfig,
        scorer: Arc<dyn ConfidenceScorer>,
        settings: ExecutorSettings,
    ) -> Self {
        let workflows = Arc::new(repos.workflows);
        let approvals = Arc::new(repos.approvals);
        let monitor = Arc::new(EventMonitor::new(repos.events));

        let queue = Arc::new(WebhookQueue::new(
            repos.webhooks,
            Arc::clone(&monitor),
            RetryPolicy::from_config(&config.queue),
            Duration::from_secs(config.queue.processing_timeout_secs),
        ));
        let registry = Arc::new(WorkflowRegistry::new(
            Arc::clone(&workflows),
            Arc::clone(&monitor),
        ));
        let approval_expiry = settings.approval_expiry;
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&workflows),
            Arc::clone(&approvals),
            Arc::clone(&monitor),
            Arc::new(engine),
            settings,
        ));
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&approvals),
            Arc::clone(&executor),
            Arc::clone(&monitor),
            approval_expiry,
        ));
        let auto = Arc::new(AutoApprover::new(
            Arc::clone(&gate),
            Arc::clone(&approvals),
            Arc::clone(&workflows),
            Arc::clone(&monitor),
            scorer,
            &config.approval,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&executor),
            Arc::clone(&auto),
            config.queue.batch_size,
        ));

        Self {
            config,
            monitor,
            queue,
            registry,
            executor,
            gate,
            auto,
            dispatcher,
        }
    }

    /// Event aggregates over `window` plus current queue, execution and
    /// approval counts.
    pub async fn dashboard(
        &self,
        window: chrono::Duration,
    ) -> Result<DashboardSummary, OrchestratorError> {
        let ops = OperationalSnapshot {
            queue_by_status: self
                .queue
                .count_by_status()
                .await?
                .into_iter()
                .map(|(status, n)| (status.to_string(), n))
                .collect(),
            executions_by_status: self
                .executor
                .count_by_status()
                .await?
                .into_iter()
                .map(|(status, n)| (status.to_string(), n))
                .collect(),
            pending_approvals: self.gate.pending_count().await?,
        };
        Ok(self.monitor.dashboard(window, ops).await?)
    }

    pub async fn health(&self) -> Result<HealthSnapshot, OrchestratorError> {
        let window = chrono::Duration::minutes(self.config.monitoring.error_window_minutes);
        Ok(HealthSnapshot {
            queue_depth: self.queue.depth().await?,
            pending_approvals: self.gate.pending_count().await?,
            recent_error_rate: self
                .monitor
                .error_rate(chrono::Utc::now() - window)
                .await?,
            in_flight_starts: self.executor.in_flight_count(),
        })
    }
}
