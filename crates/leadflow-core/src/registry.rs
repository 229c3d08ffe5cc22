//! Workflow registry: the catalog of known automations.
//!
//! Dispatch is a data lookup. A trigger event maps to every active
//! definition tagged with it; new trigger types are new rows, not new code.
//! Definitions are never hard-deleted, only deactivated.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use leadflow_types::error::{ErrorKind, RepositoryError};
use leadflow_types::monitoring::{EventRefs, EventType};
use leadflow_types::workflow::{NewWorkflowDefinition, WorkflowDefinition, WorkflowUpdate};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::engine::{EngineError, WorkflowEngine};
use crate::monitor::EventMonitor;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid workflow definition: {0}")]
    Validation(String),

    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow name '{0}' already exists")]
    NameConflict(String),

    #[error("registry sync failed: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for RegistryError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => RegistryError::NotFound("workflow".to_string()),
            other => RegistryError::Repository(other),
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::NameConflict(_) => ErrorKind::Conflict,
            RegistryError::Engine(e) => e.kind(),
            RegistryError::Repository(e) => e.kind(),
        }
    }
}

/// What a sync pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub deactivated: Vec<String>,
    pub unchanged: u32,
}

pub struct WorkflowRegistry<W: WorkflowRepository, M: MonitoringRepository> {
    repo: Arc<W>,
    monitor: Arc<EventMonitor<M>>,
}

impl<W: WorkflowRepository, M: MonitoringRepository> WorkflowRegistry<W, M> {
    pub fn new(repo: Arc<W>, monitor: Arc<EventMonitor<M>>) -> Self {
        Self { repo, monitor }
    }

    /// Active definitions subscribed to `event`.
    pub async fn resolve(&self, event: &str) -> Result<Vec<WorkflowDefinition>, RegistryError> {
        Ok(self.repo.find_by_trigger(event).await?)
    }

    /// Look up a definition by UUID or by name.
    pub async fn resolve_target(
        &self,
        id_or_name: &str,
    ) -> Result<Option<WorkflowDefinition>, RegistryError> {
        if let Ok(id) = id_or_name.parse::<Uuid>() {
            if let Some(def) = self.repo.get_definition(&id).await? {
                return Ok(Some(def));
            }
        }
        Ok(self.repo.get_definition_by_name(id_or_name).await?)
    }

    pub async fn get(&self, id: &Uuid) -> Result<WorkflowDefinition, RegistryError> {
        self.repo
            .get_definition(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<WorkflowDefinition>, RegistryError> {
        Ok(self.repo.list_definitions(active_only).await?)
    }

    pub async fn create(
        &self,
        request: NewWorkflowDefinition,
    ) -> Result<WorkflowDefinition, RegistryError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::Validation("name cannot be empty".to_string()));
        }
        if name.parse::<Uuid>().is_ok() {
            return Err(RegistryError::Validation(
                "name cannot be a UUID".to_string(),
            ));
        }
        if request.external_workflow_id.trim().is_empty() {
            return Err(RegistryError::Validation(
                "external_workflow_id cannot be empty".to_string(),
            ));
        }
        if self.repo.get_definition_by_name(&name).await?.is_some() {
            return Err(RegistryError::NameConflict(name));
        }

        let def = NewWorkflowDefinition { name, ..request }.into_definition(Utc::now());
        match self.repo.create_definition(&def).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Err(RegistryError::NameConflict(def.name)),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(workflow_id = %def.id, name = %def.name, "workflow definition created");
        self.monitor
            .info(
                EventType::WorkflowCreated,
                EventRefs::workflow(def.id),
                json!({ "name": def.name, "trigger_events": def.trigger_events }),
            )
            .await;
        Ok(def)
    }

    pub async fn update(
        &self,
        id: &Uuid,
        update: WorkflowUpdate,
    ) -> Result<WorkflowDefinition, RegistryError> {
        let mut def = self.get(id).await?;
        if let Some(ext) = &update.external_workflow_id {
            if ext.trim().is_empty() {
                return Err(RegistryError::Validation(
                    "external_workflow_id cannot be empty".to_string(),
                ));
            }
        }
        update.apply(&mut def, Utc::now());
        self.repo.update_definition(&def).await?;

        tracing::info!(workflow_id = %def.id, "workflow definition updated");
        self.monitor
            .info(
                EventType::WorkflowUpdated,
                EventRefs::workflow(def.id),
                json!({ "is_active": def.is_active, "trigger_events": def.trigger_events }),
            )
            .await;
        Ok(def)
    }

    /// Soft delete. Past executions keep pointing at the row.
    pub async fn deactivate(&self, id: &Uuid, reason: &str) -> Result<bool, RegistryError> {
        let def = self.get(id).await?;
        let changed = self.repo.set_active(id, false, Utc::now()).await?;
        if changed {
            tracing::info!(workflow_id = %id, name = %def.name, %reason, "workflow deactivated");
            self.monitor
                .info(
                    EventType::WorkflowDeactivated,
                    EventRefs::workflow(*id),
                    json!({ "name": def.name, "reason": reason }),
                )
                .await;
        }
        Ok(changed)
    }

    /// Reconcile the local catalog against the engine's workflow list.
    ///
    /// Creates rows for engine workflows with no local counterpart and
    /// deactivates active rows whose engine workflow vanished. Never
    /// reactivates and never deletes.
    pub async fn sync<E: WorkflowEngine>(&self, engine: &E) -> Result<SyncReport, RegistryError> {
        let remote = engine.list_workflows().await?;
        let local = self.repo.list_definitions(false).await?;

        let remote_ids: HashSet<&str> = remote.iter().map(|w| w.id.as_str()).collect();
        let local_ids: HashSet<&str> = local
            .iter()
            .map(|d| d.external_workflow_id.as_str())
            .collect();

        let mut report = SyncReport::default();

        for wf in remote.iter().filter(|w| !local_ids.contains(w.id.as_str())) {
            let name = if local.iter().any(|d| d.name == wf.name) {
                format!("{}-{}", wf.name, wf.id)
            } else {
                wf.name.clone()
            };
            let request = NewWorkflowDefinition {
                name,
                description: Some("imported by registry sync".to_string()),
                external_workflow_id: wf.id.clone(),
                trigger_events: wf.tags.clone(),
                requires_approval: false,
                approval_type: Default::default(),
                approval_priority: Default::default(),
                auto_approval_enabled: false,
                auto_approval_daily_cap: None,
            };
            let mut def = request.into_definition(Utc::now());
            def.is_active = wf.active;
            match self.repo.create_definition(&def).await {
                Ok(()) => report.created.push(def.name),
                Err(RepositoryError::Conflict(msg)) => {
                    tracing::warn!(external_id = %wf.id, %msg, "sync skipped conflicting workflow");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for def in &local {
            if remote_ids.contains(def.external_workflow_id.as_str()) || !def.is_active {
                report.unchanged += 1;
                continue;
            }
            if self.repo.set_active(&def.id, false, Utc::now()).await? {
                self.monitor
                    .warning(
                        EventType::WorkflowDeactivated,
                        EventRefs::workflow(def.id),
                        json!({ "name": def.name, "reason": "removed from engine" }),
                    )
                    .await;
                report.deactivated.push(def.name.clone());
            } else {
                report.unchanged += 1;
            }
        }

        tracing::info!(
            created = report.created.len(),
            deactivated = report.deactivated.len(),
            unchanged = report.unchanged,
            "registry sync complete"
        );
        self.monitor
            .info(
                EventType::RegistrySynced,
                EventRefs::default(),
                json!({
                    "created": report.created,
                    "deactivated": report.deactivated,
                    "unchanged": report.unchanged,
                }),
            )
            .await;
        Ok(report)
    }
}
