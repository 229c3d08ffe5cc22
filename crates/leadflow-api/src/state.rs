//! Application state wiring all services together.
//!
//! AppState holds the orchestrator pinned to the SQLite repositories and the
//! HTTP engine client. Both the CLI and the HTTP handlers use it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use leadflow_core::approval::auto::RuleBasedScorer;
use leadflow_core::orchestrator::{Orchestrator, Repositories};
use leadflow_infra::config::{load_config, resolve_data_dir};
use leadflow_infra::engine::HttpWorkflowEngine;
use leadflow_infra::sqlite::approval::SqliteApprovalRepository;
use leadflow_infra::sqlite::monitoring::SqliteMonitoringRepository;
use leadflow_infra::sqlite::pool::{DatabasePool, database_url};
use leadflow_infra::sqlite::webhook_queue::SqliteWebhookQueueRepository;
use leadflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use leadflow_infra::webhook::WebhookSecrets;
use leadflow_types::config::OrchestratorConfig;

pub type ConcreteOrchestrator = Orchestrator<
    SqliteWebhookQueueRepository,
    SqliteWorkflowRepository,
    SqliteApprovalRepository,
    SqliteMonitoringRepository,
    HttpWorkflowEngine,
>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConcreteOrchestrator>,
    pub secrets: Arc<WebhookSecrets>,
    pub config: Arc<OrchestratorConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data dir, load `config.toml` and wire everything.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;
        Self::build(data_dir, config).await
    }

    /// Wire the state over an existing data dir and an explicit config.
    pub async fn build(data_dir: PathBuf, config: OrchestratorConfig) -> anyhow::Result<Self> {
        let db_url = format!("{}?mode=rwc", database_url(&data_dir));
        let db_pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("cannot open database {db_url}"))?;

        let engine = HttpWorkflowEngine::new(&config.engine)
            .context("cannot build workflow engine client")?;

        let repos = Repositories {
            webhooks: SqliteWebhookQueueRepository::new(db_pool.clone()),
            workflows: SqliteWorkflowRepository::new(db_pool.clone()),
            approvals: SqliteApprovalRepository::new(db_pool.clone()),
            events: SqliteMonitoringRepository::new(db_pool.clone()),
        };
        let orchestrator = Orchestrator::new(
            repos,
            engine,
            config.clone(),
            Arc::new(RuleBasedScorer::default()),
        );
        let secrets = WebhookSecrets::new(
            &config.webhook,
            &config.engine,
            config.queue.default_priority,
        );

        tracing::debug!(data_dir = %data_dir.display(), engine = %config.engine.base_url, "application state ready");

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            secrets: Arc::new(secrets),
            config: Arc::new(config),
            data_dir,
            db_pool,
        })
    }
}
