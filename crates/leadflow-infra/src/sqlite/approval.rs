//! SQLite approval repository.
//!
//! Every decision is `UPDATE ... WHERE status = 'pending'`: whichever writer
//! lands first wins and the others see zero affected rows.

use chrono::{DateTime, Utc};
use leadflow_core::repository::approval::ApprovalRepository;
use leadflow_types::approval::{
    ApprovalFilter, ApprovalPriority, ApprovalRequest, ApprovalStatus, ApprovalType, Decision,
};
use leadflow_types::error::RepositoryError;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    format_datetime, parse_datetime, parse_json, parse_opt_datetime, parse_uuid, query_err,
    to_json,
};

const DEFAULT_LIST_LIMIT: u32 = 100;

/// `high` first, `low` last.
const PRIORITY_ORDER: &str =
    "CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END";

pub struct SqliteApprovalRepository {
    pool: DatabasePool,
}

impl SqliteApprovalRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct ApprovalRow {
    id: String,
    execution_id: String,
    workflow_id: String,
    approval_type: String,
    status: String,
    priority: String,
    auto_approval_confidence: Option<f64>,
    escalation_level: i64,
    context: String,
    decided_by: Option<String>,
    decision_reason: Option<String>,
    auto_approved: bool,
    expires_at: String,
    created_at: String,
    decided_at: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            workflow_id: row.try_get("workflow_id")?,
            approval_type: row.try_get("approval_type")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            auto_approval_confidence: row.try_get("auto_approval_confidence")?,
            escalation_level: row.try_get("escalation_level")?,
            context: row.try_get("context")?,
            decided_by: row.try_get("decided_by")?,
            decision_reason: row.try_get("decision_reason")?,
            auto_approved: row.try_get("auto_approved")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            decided_at: row.try_get("decided_at")?,
        })
    }

    fn into_request(self) -> Result<ApprovalRequest, RepositoryError> {
        let approval_type: ApprovalType = self
            .approval_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let status: ApprovalStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let priority: ApprovalPriority = self
            .priority
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        Ok(ApprovalRequest {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            approval_type,
            status,
            priority,
            auto_approval_confidence: self.auto_approval_confidence,
            escalation_level: self.escalation_level.clamp(0, u8::MAX as i64) as u8,
            context: parse_json(&self.context, "approval context")?,
            decided_by: self.decided_by,
            decision_reason: self.decision_reason,
            auto_approved: self.auto_approved,
            expires_at: parse_datetime(&self.expires_at)?,
            created_at: parse_datetime(&self.created_at)?,
            decided_at: parse_opt_datetime(self.decided_at.as_deref())?,
        })
    }
}

fn rows_to_requests(rows: &[SqliteRow]) -> Result<Vec<ApprovalRequest>, RepositoryError> {
    rows.iter()
        .map(|row| ApprovalRow::from_row(row).map_err(query_err)?.into_request())
        .collect()
}

impl ApprovalRepository for SqliteApprovalRepository {
    async fn create(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, execution_id, workflow_id, approval_type, status, priority,
                auto_approval_confidence, escalation_level, context, decided_by,
                decision_reason, auto_approved, expires_at, created_at, decided_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(request.id.to_string())
        .bind(request.execution_id.to_string())
        .bind(request.workflow_id.to_string())
        .bind(request.approval_type.as_str())
        .bind(request.status.as_str())
        .bind(request.priority.as_str())
        .bind(request.auto_approval_confidence)
        .bind(request.escalation_level as i64)
        .bind(to_json(&request.context)?)
        .bind(&request.decided_by)
        .bind(&request.decision_reason)
        .bind(request.auto_approved)
        .bind(format_datetime(&request.expires_at))
        .bind(format_datetime(&request.created_at))
        .bind(request.decided_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => RepositoryError::Conflict(format!(
                "execution {} already has a pending approval",
                request.execution_id
            )),
            _ => query_err(e),
        })?;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| ApprovalRow::from_row(&r).map_err(query_err)?.into_request())
            .transpose()
    }

    async fn get_pending_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM approval_requests WHERE execution_id = ? AND status = 'pending'",
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        row.map(|r| ApprovalRow::from_row(&r).map_err(query_err)?.into_request())
            .transpose()
    }

    async fn latest_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT * FROM approval_requests WHERE execution_id = ?
               ORDER BY created_at DESC, id DESC LIMIT 1"#,
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        row.map(|r| ApprovalRow::from_row(&r).map_err(query_err)?.into_request())
            .transpose()
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM approval_requests WHERE 1 = 1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.workflow_id.is_some() {
            sql.push_str(" AND workflow_id = ?");
        }
        if filter.priority.is_some() {
            sql.push_str(" AND priority = ?");
        }
        sql.push_str(&format!(" ORDER BY {PRIORITY_ORDER}, created_at ASC LIMIT ?"));

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(workflow_id) = filter.workflow_id {
            query = query.bind(workflow_id.to_string());
        }
        if let Some(priority) = filter.priority {
            query = query.bind(priority.as_str());
        }
        let rows = query
            .bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT) as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows_to_requests(&rows)
    }

    async fn count_pending(&self) -> Result<u64, RepositoryError> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM approval_requests WHERE status = 'pending'")
                .fetch_one(&self.pool.reader)
                .await
                .map_err(query_err)?;
        Ok(n as u64)
    }

    async fn decide(&self, id: &Uuid, decision: &Decision) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE approval_requests
               SET status = ?, decided_by = ?, decision_reason = ?, auto_approved = ?, decided_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(decision.status.as_str())
        .bind(&decision.actor)
        .bind(&decision.reason)
        .bind(decision.auto_approved)
        .bind(format_datetime(&decision.decided_at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn auto_approve(
        &self,
        id: &Uuid,
        decision: &Decision,
        workflow_id: &Uuid,
        day_start: DateTime<Utc>,
        cap: u32,
    ) -> Result<bool, RepositoryError> {
        // The cap check and the transition are one statement on the single
        // writer connection, so concurrent evaluations cannot overshoot.
        let result = sqlx::query(
            r#"UPDATE approval_requests
               SET status = 'approved', decided_by = ?, decision_reason = ?,
                   auto_approved = 1, decided_at = ?
               WHERE id = ? AND status = 'pending'
                 AND (SELECT COUNT(*) FROM approval_requests
                      WHERE workflow_id = ? AND auto_approved = 1 AND decided_at >= ?) < ?"#,
        )
        .bind(&decision.actor)
        .bind(&decision.reason)
        .bind(format_datetime(&decision.decided_at))
        .bind(id.to_string())
        .bind(workflow_id.to_string())
        .bind(format_datetime(&day_start))
        .bind(cap as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_confidence(&self, id: &Uuid, confidence: f64) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_requests SET auto_approval_confidence = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(confidence)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn escalate(
        &self,
        id: &Uuid,
        max_level: u8,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(
            r#"UPDATE approval_requests
               SET escalation_level = escalation_level + 1,
                   priority = CASE priority WHEN 'low' THEN 'medium' ELSE 'high' END
               WHERE id = ? AND status = 'pending' AND escalation_level < ?
               RETURNING *"#,
        )
        .bind(id.to_string())
        .bind(max_level as i64)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?;
        row.map(|r| ApprovalRow::from_row(&r).map_err(query_err)?.into_request())
            .transpose()
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM approval_requests
               WHERE status = 'pending' AND expires_at <= ?
               ORDER BY expires_at ASC LIMIT ?"#,
        )
        .bind(format_datetime(&now))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows_to_requests(&rows)
    }

    async fn count_auto_approved_since(
        &self,
        workflow_id: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let (n,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM approval_requests
               WHERE workflow_id = ? AND auto_approved = 1 AND decided_at >= ?"#,
        )
        .bind(workflow_id.to_string())
        .bind(format_datetime(&since))
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;
        Ok(n as u64)
    }
}
