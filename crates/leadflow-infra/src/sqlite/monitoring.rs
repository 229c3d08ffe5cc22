//! SQLite monitoring event store. Append-only, pruned in bounded batches.

use chrono::{DateTime, Utc};
use leadflow_core::repository::monitoring::MonitoringRepository;
use leadflow_types::error::RepositoryError;
use leadflow_types::monitoring::{EventFilter, EventRefs, EventType, MonitoringEvent, Severity};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_json, parse_opt_uuid, parse_uuid, query_err, to_json};

const DEFAULT_QUERY_LIMIT: u32 = 200;

pub struct SqliteMonitoringRepository {
    pool: DatabasePool,
}

impl SqliteMonitoringRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn severity_rank(severity: Severity) -> i64 {
    match severity {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
        Severity::Critical => 3,
    }
}

struct EventRow {
    id: String,
    event_type: String,
    severity: String,
    workflow_id: Option<String>,
    execution_id: Option<String>,
    webhook_id: Option<String>,
    approval_id: Option<String>,
    payload: String,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            severity: row.try_get("severity")?,
            workflow_id: row.try_get("workflow_id")?,
            execution_id: row.try_get("execution_id")?,
            webhook_id: row.try_get("webhook_id")?,
            approval_id: row.try_get("approval_id")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_event(self) -> Result<MonitoringEvent, RepositoryError> {
        let event_type: EventType = self
            .event_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let severity: Severity = self
            .severity
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        Ok(MonitoringEvent {
            id: parse_uuid(&self.id)?,
            event_type,
            severity,
            refs: EventRefs {
                workflow_id: parse_opt_uuid(self.workflow_id.as_deref())?,
                execution_id: parse_opt_uuid(self.execution_id.as_deref())?,
                webhook_id: parse_opt_uuid(self.webhook_id.as_deref())?,
                approval_id: parse_opt_uuid(self.approval_id.as_deref())?,
            },
            payload: parse_json(&self.payload, "event payload")?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl MonitoringRepository for SqliteMonitoringRepository {
    async fn insert(&self, event: &MonitoringEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO monitoring_events
               (id, event_type, severity, severity_rank, workflow_id, execution_id,
                webhook_id, approval_id, payload, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(severity_rank(event.severity))
        .bind(event.refs.workflow_id.map(|u| u.to_string()))
        .bind(event.refs.execution_id.map(|u| u.to_string()))
        .bind(event.refs.webhook_id.map(|u| u.to_string()))
        .bind(event.refs.approval_id.map(|u| u.to_string()))
        .bind(to_json(&event.payload)?)
        .bind(format_datetime(&event.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<MonitoringEvent>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM monitoring_events WHERE 1 = 1");
        if filter.since.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filter.min_severity.is_some() {
            sql.push_str(" AND severity_rank >= ?");
        }
        if filter.event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if filter.workflow_id.is_some() {
            sql.push_str(" AND workflow_id = ?");
        }
        if filter.execution_id.is_some() {
            sql.push_str(" AND execution_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(since) = &filter.since {
            query = query.bind(format_datetime(since));
        }
        if let Some(severity) = filter.min_severity {
            query = query.bind(severity_rank(severity));
        }
        if let Some(event_type) = filter.event_type {
            query = query.bind(event_type.as_str());
        }
        if let Some(workflow_id) = filter.workflow_id {
            query = query.bind(workflow_id.to_string());
        }
        if let Some(execution_id) = filter.execution_id {
            query = query.bind(execution_id.to_string());
        }
        let rows = query
            .bind(filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| EventRow::from_row(row).map_err(query_err)?.into_event())
            .collect()
    }

    async fn count_by_severity(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(Severity, u64)>, RepositoryError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) FROM monitoring_events WHERE created_at >= ? GROUP BY severity",
        )
        .bind(format_datetime(&since))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.into_iter()
            .map(|(severity, n)| {
                let severity: Severity =
                    severity.parse().map_err(|e: String| RepositoryError::Query(e))?;
                Ok((severity, n as u64))
            })
            .collect()
    }

    async fn count_by_type(&self, since: DateTime<Utc>) -> Result<Vec<(String, u64)>, RepositoryError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT event_type, COUNT(*) FROM monitoring_events
               WHERE created_at >= ? GROUP BY event_type ORDER BY event_type"#,
        )
        .bind(format_datetime(&since))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        Ok(rows.into_iter().map(|(t, n)| (t, n as u64)).collect())
    }

    async fn delete_batch_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"DELETE FROM monitoring_events WHERE id IN (
                   SELECT id FROM monitoring_events
                   WHERE created_at < ? ORDER BY created_at ASC LIMIT ?
               )"#,
        )
        .bind(format_datetime(&cutoff))
        .bind(batch_size as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(result.rows_affected())
    }
}
