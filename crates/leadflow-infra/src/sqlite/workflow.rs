//! SQLite workflow repository: definitions, trigger subscriptions and
//! executions.
//!
//! Trigger events live in `workflow_triggers`, so routing an event is an
//! indexed join. Execution counters move in the same transaction as the
//! status change they count.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use leadflow_core::repository::workflow::{ExecutionTransition, WorkflowRepository};
use leadflow_types::approval::{ApprovalPriority, ApprovalType};
use leadflow_types::error::RepositoryError;
use leadflow_types::workflow::{
    ExecutionFilter, ExecutionStatus, WorkflowDefinition, WorkflowExecution,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    format_datetime, parse_datetime, parse_json, parse_opt_datetime, parse_opt_uuid, parse_uuid,
    query_err, to_json,
};

const DEFAULT_EXECUTION_LIMIT: u32 = 100;

pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn load_triggers(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>, RepositoryError> {
        let mut out: HashMap<Uuid, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT workflow_id, event_type FROM workflow_triggers WHERE workflow_id IN ({placeholders}) ORDER BY workflow_id, position"
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool.reader).await.map_err(query_err)?;
        for (workflow_id, event) in rows {
            out.entry(parse_uuid(&workflow_id)?).or_default().push(event);
        }
        Ok(out)
    }

    async fn hydrate(&self, rows: &[SqliteRow]) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs = rows
            .iter()
            .map(|row| DefinitionRow::from_row(row).map_err(query_err)?.into_definition())
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = defs.iter().map(|d| d.id).collect();
        let mut triggers = self.load_triggers(&ids).await?;
        for def in &mut defs {
            def.trigger_events = triggers.remove(&def.id).unwrap_or_default();
        }
        Ok(defs)
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct DefinitionRow {
    id: String,
    name: String,
    description: Option<String>,
    external_workflow_id: String,
    is_active: bool,
    requires_approval: bool,
    approval_type: String,
    approval_priority: String,
    auto_approval_enabled: bool,
    auto_approval_daily_cap: Option<i64>,
    execution_count: i64,
    success_count: i64,
    failure_count: i64,
    created_at: String,
    updated_at: String,
}

impl DefinitionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            external_workflow_id: row.try_get("external_workflow_id")?,
            is_active: row.try_get("is_active")?,
            requires_approval: row.try_get("requires_approval")?,
            approval_type: row.try_get("approval_type")?,
            approval_priority: row.try_get("approval_priority")?,
            auto_approval_enabled: row.try_get("auto_approval_enabled")?,
            auto_approval_daily_cap: row.try_get("auto_approval_daily_cap")?,
            execution_count: row.try_get("execution_count")?,
            success_count: row.try_get("success_count")?,
            failure_count: row.try_get("failure_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Trigger events are filled in separately.
    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        let approval_type: ApprovalType = self
            .approval_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let approval_priority: ApprovalPriority = self
            .approval_priority
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        Ok(WorkflowDefinition {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            external_workflow_id: self.external_workflow_id,
            trigger_events: Vec::new(),
            is_active: self.is_active,
            requires_approval: self.requires_approval,
            approval_type,
            approval_priority,
            auto_approval_enabled: self.auto_approval_enabled,
            auto_approval_daily_cap: self.auto_approval_daily_cap.map(|c| c.max(0) as u32),
            execution_count: self.execution_count as u64,
            success_count: self.success_count as u64,
            failure_count: self.failure_count as u64,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct ExecutionRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    webhook_id: Option<String>,
    external_execution_id: Option<String>,
    status: String,
    input: String,
    output: Option<String>,
    error_message: Option<String>,
    retry_count: i64,
    retry_of: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
}

impl ExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            webhook_id: row.try_get("webhook_id")?,
            external_execution_id: row.try_get("external_execution_id")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            retry_of: row.try_get("retry_of")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        let status: ExecutionStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_name: self.workflow_name,
            webhook_id: parse_opt_uuid(self.webhook_id.as_deref())?,
            external_execution_id: self.external_execution_id,
            status,
            input: parse_json(&self.input, "execution input")?,
            output: self
                .output
                .as_deref()
                .map(|s| parse_json(s, "execution output"))
                .transpose()?,
            error_message: self.error_message,
            retry_count: self.retry_count as u32,
            retry_of: parse_opt_uuid(self.retry_of.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
            started_at: parse_opt_datetime(self.started_at.as_deref())?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
            duration_ms: self.duration_ms,
        })
    }
}

fn name_conflict(e: sqlx::Error, name: &str) -> RepositoryError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(format!("workflow name '{name}' already exists"))
        }
        _ => query_err(e),
    }
}

async fn write_triggers(
    tx: &mut sqlx::SqliteConnection,
    def: &WorkflowDefinition,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM workflow_triggers WHERE workflow_id = ?")
        .bind(def.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

    for (position, event) in def.trigger_events.iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO workflow_triggers (workflow_id, event_type, position) VALUES (?, ?, ?)",
        )
        .bind(def.id.to_string())
        .bind(event)
        .bind(position as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO workflow_definitions
               (id, name, description, external_workflow_id, is_active, requires_approval,
                approval_type, approval_priority, auto_approval_enabled, auto_approval_daily_cap,
                execution_count, success_count, failure_count, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.external_workflow_id)
        .bind(def.is_active)
        .bind(def.requires_approval)
        .bind(def.approval_type.as_str())
        .bind(def.approval_priority.as_str())
        .bind(def.auto_approval_enabled)
        .bind(def.auto_approval_daily_cap.map(i64::from))
        .bind(def.execution_count as i64)
        .bind(def.success_count as i64)
        .bind(def.failure_count as i64)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| name_conflict(e, &def.name))?;

        write_triggers(&mut tx, def).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn update_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        // Counters are owned by the execution transitions and never
        // overwritten from a possibly stale in-memory copy.
        let result = sqlx::query(
            r#"UPDATE workflow_definitions
               SET name = ?, description = ?, external_workflow_id = ?, is_active = ?,
                   requires_approval = ?, approval_type = ?, approval_priority = ?,
                   auto_approval_enabled = ?, auto_approval_daily_cap = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.external_workflow_id)
        .bind(def.is_active)
        .bind(def.requires_approval)
        .bind(def.approval_type.as_str())
        .bind(def.approval_priority.as_str())
        .bind(def.auto_approval_enabled)
        .bind(def.auto_approval_daily_cap.map(i64::from))
        .bind(format_datetime(&def.updated_at))
        .bind(def.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| name_conflict(e, &def.name))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        write_triggers(&mut tx, def).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(self.hydrate(&rows).await?.into_iter().next())
    }

    async fn get_definition_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_definitions WHERE name = ?")
            .bind(name)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(self.hydrate(&rows).await?.into_iter().next())
    }

    async fn list_definitions(
        &self,
        active_only: bool,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let sql = if active_only {
            "SELECT * FROM workflow_definitions WHERE is_active = 1 ORDER BY name ASC"
        } else {
            "SELECT * FROM workflow_definitions ORDER BY name ASC"
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        self.hydrate(&rows).await
    }

    async fn find_by_trigger(&self, event: &str) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT d.* FROM workflow_definitions d
               JOIN workflow_triggers t ON t.workflow_id = d.id
               WHERE t.event_type = ? AND d.is_active = 1
               ORDER BY d.created_at ASC, d.id ASC"#,
        )
        .bind(event)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        self.hydrate(&rows).await
    }

    async fn set_active(
        &self,
        id: &Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_definitions SET is_active = ?, updated_at = ? WHERE id = ? AND is_active != ?",
        )
        .bind(active)
        .bind(format_datetime(&now))
        .bind(id.to_string())
        .bind(active)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, workflow_id, workflow_name, webhook_id, external_execution_id, status,
                input, output, error_message, retry_count, retry_of,
                created_at, started_at, completed_at, duration_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(&execution.workflow_name)
        .bind(execution.webhook_id.map(|u| u.to_string()))
        .bind(&execution.external_execution_id)
        .bind(execution.status.as_str())
        .bind(to_json(&execution.input)?)
        .bind(execution.output.as_ref().map(to_json).transpose()?)
        .bind(&execution.error_message)
        .bind(execution.retry_count as i64)
        .bind(execution.retry_of.map(|u| u.to_string()))
        .bind(format_datetime(&execution.created_at))
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.duration_ms)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let bumped = sqlx::query(
            "UPDATE workflow_definitions SET execution_count = execution_count + 1 WHERE id = ?",
        )
        .bind(execution.workflow_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if bumped.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|r| ExecutionRow::from_row(&r).map_err(query_err)?.into_execution())
            .transpose()
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM workflow_executions WHERE 1 = 1");
        if filter.workflow_id.is_some() {
            sql.push_str(" AND workflow_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(workflow_id) = filter.workflow_id {
            query = query.bind(workflow_id.to_string());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        let limit = filter.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT);
        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| ExecutionRow::from_row(row).map_err(query_err)?.into_execution())
            .collect()
    }

    async fn list_oldest_executions(
        &self,
        status: ExecutionStatus,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_executions
               WHERE status = ? AND COALESCE(started_at, created_at) <= ?
               ORDER BY COALESCE(started_at, created_at) ASC, id ASC LIMIT ?"#,
        )
        .bind(status.as_str())
        .bind(format_datetime(&before))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| ExecutionRow::from_row(row).map_err(query_err)?.into_execution())
            .collect()
    }

    async fn list_stalled_pending(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT e.* FROM workflow_executions e
               WHERE e.status = 'pending' AND e.created_at <= ?
                 AND NOT EXISTS (
                     SELECT 1 FROM approval_requests a
                     WHERE a.execution_id = e.id AND a.status = 'pending')
               ORDER BY e.created_at ASC, e.id ASC LIMIT ?"#,
        )
        .bind(format_datetime(&before))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| ExecutionRow::from_row(row).map_err(query_err)?.into_execution())
            .collect()
    }

    async fn transition_execution(
        &self,
        id: &Uuid,
        from: &[ExecutionStatus],
        transition: &ExecutionTransition,
    ) -> Result<bool, RepositoryError> {
        if from.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            r#"UPDATE workflow_executions
               SET status = ?,
                   external_execution_id = COALESCE(?, external_execution_id),
                   output = COALESCE(?, output),
                   error_message = COALESCE(?, error_message),
                   started_at = COALESCE(?, started_at),
                   completed_at = COALESCE(?, completed_at),
                   duration_ms = COALESCE(?, duration_ms)
               WHERE id = ? AND status IN ({placeholders})
               RETURNING workflow_id"#
        );

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let mut query = sqlx::query(&sql)
            .bind(transition.to.as_str())
            .bind(&transition.external_execution_id)
            .bind(transition.output.as_ref().map(to_json).transpose()?)
            .bind(&transition.error_message)
            .bind(transition.started_at.as_ref().map(format_datetime))
            .bind(transition.completed_at.as_ref().map(format_datetime))
            .bind(transition.duration_ms)
            .bind(id.to_string());
        for status in from {
            query = query.bind(status.as_str());
        }
        let Some(row) = query.fetch_optional(&mut *tx).await.map_err(query_err)? else {
            return Ok(false);
        };
        let workflow_id: String = row.try_get("workflow_id").map_err(query_err)?;

        let counter = match transition.to {
            ExecutionStatus::Completed => Some("success_count"),
            ExecutionStatus::Failed => Some("failure_count"),
            _ => None,
        };
        if let Some(column) = counter {
            sqlx::query(&format!(
                "UPDATE workflow_definitions SET {column} = {column} + 1 WHERE id = ?"
            ))
            .bind(&workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }

    async fn count_executions_by_status(
        &self,
    ) -> Result<Vec<(ExecutionStatus, u64)>, RepositoryError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM workflow_executions GROUP BY status")
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_err)?;

        rows.into_iter()
            .map(|(status, n)| {
                let status: ExecutionStatus =
                    status.parse().map_err(|e: String| RepositoryError::Query(e))?;
                Ok((status, n as u64))
            })
            .collect()
    }
}
