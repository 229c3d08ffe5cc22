//! SQLite webhook queue.
//!
//! Claims are one `UPDATE ... RETURNING` over a priority-ordered subquery,
//! so two workers can never receive the same row. Retry bookkeeping is
//! compare-and-set on the `retry_count` the caller observed.

use chrono::{DateTime, Utc};
use leadflow_core::repository::webhook::WebhookQueueRepository;
use leadflow_types::error::RepositoryError;
use leadflow_types::webhook::{EnqueueOutcome, NewWebhook, QueuedWebhook, WebhookStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    format_datetime, parse_datetime, parse_json, parse_opt_datetime, parse_opt_uuid, parse_uuid,
    query_err, to_json,
};

pub struct SqliteWebhookQueueRepository {
    pool: DatabasePool,
}

impl SqliteWebhookQueueRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct WebhookRow {
    id: String,
    idempotency_key: Option<String>,
    source: String,
    event_type: String,
    payload: String,
    target_workflow_id: Option<String>,
    status: String,
    priority: i64,
    retry_count: i64,
    max_retries: i64,
    next_retry_at: Option<String>,
    claimed_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    processed_at: Option<String>,
}

impl WebhookRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            source: row.try_get("source")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            target_workflow_id: row.try_get("target_workflow_id")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            next_retry_at: row.try_get("next_retry_at")?,
            claimed_at: row.try_get("claimed_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn into_webhook(self) -> Result<QueuedWebhook, RepositoryError> {
        let status: WebhookStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        Ok(QueuedWebhook {
            id: parse_uuid(&self.id)?,
            idempotency_key: self.idempotency_key,
            source: self.source,
            event_type: self.event_type,
            payload: parse_json(&self.payload, "payload")?,
            target_workflow_id: parse_opt_uuid(self.target_workflow_id.as_deref())?,
            status,
            priority: self.priority as i32,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            next_retry_at: parse_opt_datetime(self.next_retry_at.as_deref())?,
            claimed_at: parse_opt_datetime(self.claimed_at.as_deref())?,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            processed_at: parse_opt_datetime(self.processed_at.as_deref())?,
        })
    }
}

fn rows_to_webhooks(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<QueuedWebhook>, RepositoryError> {
    rows.iter()
        .map(|row| WebhookRow::from_row(row).map_err(query_err)?.into_webhook())
        .collect()
}

impl WebhookQueueRepository for SqliteWebhookQueueRepository {
    async fn enqueue(
        &self,
        webhook: &NewWebhook,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, RepositoryError> {
        let id = Uuid::now_v7();
        let now_str = format_datetime(&now);
        let payload = to_json(&webhook.payload)?;

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        // The partial unique index only covers live rows, so a key that
        // already reached a terminal status may be enqueued again.
        let inserted = sqlx::query(
            r#"INSERT INTO webhook_queue
               (id, idempotency_key, source, event_type, payload, target_workflow_id,
                status, priority, retry_count, max_retries, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, 'queued', ?, 0, ?, ?, ?)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(id.to_string())
        .bind(&webhook.idempotency_key)
        .bind(&webhook.source)
        .bind(&webhook.event_type)
        .bind(&payload)
        .bind(webhook.target_workflow_id.map(|u| u.to_string()))
        .bind(webhook.priority as i64)
        .bind(webhook.max_retries as i64)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        if inserted.rows_affected() == 1 {
            tx.commit().await.map_err(query_err)?;
            return Ok(EnqueueOutcome {
                id,
                duplicate: false,
            });
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM webhook_queue WHERE idempotency_key = ? AND status IN ('queued', 'processing')",
        )
        .bind(&webhook.idempotency_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?;
        tx.commit().await.map_err(query_err)?;

        match existing {
            Some((existing_id,)) => Ok(EnqueueOutcome {
                id: parse_uuid(&existing_id)?,
                duplicate: true,
            }),
            None => Err(RepositoryError::Conflict(
                "webhook insert ignored without a live duplicate".to_string(),
            )),
        }
    }

    async fn get(&self, id: &Uuid) -> Result<Option<QueuedWebhook>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM webhook_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|r| WebhookRow::from_row(&r).map_err(query_err)?.into_webhook())
            .transpose()
    }

    async fn list(
        &self,
        status: Option<WebhookStatus>,
        limit: u32,
    ) -> Result<Vec<QueuedWebhook>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM webhook_queue WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM webhook_queue ORDER BY created_at DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;

        rows_to_webhooks(&rows)
    }

    async fn claim_batch(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedWebhook>, RepositoryError> {
        let rows = sqlx::query(
            r#"UPDATE webhook_queue
               SET status = 'processing', claimed_at = ?1, updated_at = ?1
               WHERE id IN (
                   SELECT id FROM webhook_queue
                   WHERE status = 'queued'
                     AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                   ORDER BY priority DESC, created_at ASC, id ASC
                   LIMIT ?2
               )
               AND status = 'queued'
               RETURNING *"#,
        )
        .bind(format_datetime(&now))
        .bind(limit as i64)
        .fetch_all(&self.pool.writer)
        .await
        .map_err(query_err)?;

        // RETURNING order is unspecified.
        let mut claimed = rows_to_webhooks(&rows)?;
        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(claimed)
    }

    async fn finish(
        &self,
        id: &Uuid,
        to: WebhookStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now_str = format_datetime(&now);
        let result = sqlx::query(
            r#"UPDATE webhook_queue
               SET status = ?, last_error = COALESCE(?, last_error),
                   processed_at = ?, updated_at = ?
               WHERE id = ? AND status = 'processing'"#,
        )
        .bind(to.as_str())
        .bind(error)
        .bind(&now_str)
        .bind(&now_str)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue(
        &self,
        id: &Uuid,
        expected_retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE webhook_queue
               SET status = 'queued', retry_count = retry_count + 1,
                   next_retry_at = ?, last_error = ?, claimed_at = NULL, updated_at = ?
               WHERE id = ? AND status = 'processing'
                 AND retry_count = ? AND retry_count + 1 < max_retries"#,
        )
        .bind(format_datetime(&next_retry_at))
        .bind(error)
        .bind(format_datetime(&now))
        .bind(id.to_string())
        .bind(expected_retry_count as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn exhaust(
        &self,
        id: &Uuid,
        expected_retry_count: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now_str = format_datetime(&now);
        let result = sqlx::query(
            r#"UPDATE webhook_queue
               SET status = 'failed', retry_count = MIN(retry_count + 1, max_retries),
                   last_error = ?, claimed_at = NULL, processed_at = ?, updated_at = ?
               WHERE id = ? AND status = 'processing' AND retry_count = ?"#,
        )
        .bind(error)
        .bind(&now_str)
        .bind(&now_str)
        .bind(id.to_string())
        .bind(expected_retry_count as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, id: &Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let now_str = format_datetime(&now);
        let result = sqlx::query(
            r#"UPDATE webhook_queue
               SET status = 'cancelled', processed_at = ?, updated_at = ?
               WHERE id = ? AND status = 'queued'"#,
        )
        .bind(&now_str)
        .bind(&now_str)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueuedWebhook>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM webhook_queue
               WHERE status = 'processing' AND claimed_at < ?
               ORDER BY claimed_at ASC LIMIT ?"#,
        )
        .bind(format_datetime(&claimed_before))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows_to_webhooks(&rows)
    }

    async fn count_by_status(&self) -> Result<Vec<(WebhookStatus, u64)>, RepositoryError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM webhook_queue GROUP BY status")
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_err)?;

        rows.into_iter()
            .map(|(status, n)| {
                let status: WebhookStatus =
                    status.parse().map_err(|e: String| RepositoryError::Query(e))?;
                Ok((status, n as u64))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_support::test_pool;
    use chrono::Duration;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn new_webhook(key: Option<&str>, priority: i32) -> NewWebhook {
        NewWebhook {
            idempotency_key: key.map(String::from),
            source: "crm".to_string(),
            event_type: "lead.created".to_string(),
            payload: json!({ "email": "ada@example.com" }),
            target_workflow_id: None,
            priority,
            max_retries: 3,
        }
    }

    async fn repo() -> SqliteWebhookQueueRepository {
        SqliteWebhookQueueRepository::new(test_pool().await)
    }

    #[tokio::test]
    async fn enqueue_and_get() {
        let repo = repo().await;
        let outcome = repo.enqueue(&new_webhook(Some("k1"), 7), Utc::now()).await.unwrap();
        assert!(!outcome.duplicate);

        let row = repo.get(&outcome.id).await.unwrap().unwrap();
        assert_eq!(row.status, WebhookStatus::Queued);
        assert_eq!(row.priority, 7);
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.payload["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn live_duplicate_returns_existing_id() {
        let repo = repo().await;
        let first = repo.enqueue(&new_webhook(Some("dup"), 5), Utc::now()).await.unwrap();
        let second = repo.enqueue(&new_webhook(Some("dup"), 5), Utc::now()).await.unwrap();

        assert!(second.duplicate);
        assert_eq!(first.id, second.id);
        assert_eq!(repo.list(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn key_reusable_after_terminal_status() {
        let repo = repo().await;
        let first = repo.enqueue(&new_webhook(Some("again"), 5), Utc::now()).await.unwrap();
        repo.claim_batch(10, Utc::now()).await.unwrap();
        assert!(repo.finish(&first.id, WebhookStatus::Sent, None, Utc::now()).await.unwrap());

        let second = repo.enqueue(&new_webhook(Some("again"), 5), Utc::now()).await.unwrap();
        assert!(!second.duplicate);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn rows_without_key_never_collide() {
        let repo = repo().await;
        let a = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        let b = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        assert!(!a.duplicate && !b.duplicate);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_age() {
        let repo = repo().await;
        let base = Utc::now();
        let low = repo.enqueue(&new_webhook(None, 1), base).await.unwrap();
        let high_old = repo
            .enqueue(&new_webhook(None, 9), base + Duration::milliseconds(1))
            .await
            .unwrap();
        let high_new = repo
            .enqueue(&new_webhook(None, 9), base + Duration::milliseconds(2))
            .await
            .unwrap();

        let claimed = repo.claim_batch(2, Utc::now()).await.unwrap();
        let ids: Vec<Uuid> = claimed.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![high_old.id, high_new.id]);
        assert!(claimed.iter().all(|w| w.status == WebhookStatus::Processing));
        assert!(claimed.iter().all(|w| w.claimed_at.is_some()));

        let rest = repo.claim_batch(10, Utc::now()).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, low.id);
    }

    #[tokio::test]
    async fn claim_skips_rows_not_yet_due() {
        let repo = repo().await;
        let row = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        let claimed = repo.claim_batch(1, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let later = Utc::now() + Duration::seconds(30);
        assert!(repo.requeue(&row.id, 0, later, "boom", Utc::now()).await.unwrap());

        assert!(repo.claim_batch(10, Utc::now()).await.unwrap().is_empty());
        let due = repo
            .claim_batch(10, later + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 1);
        assert_eq!(due[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_rows() {
        let repo = Arc::new(repo().await);
        for _ in 0..20 {
            repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..5 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.claim_batch(6, Utc::now()).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for row in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(row.id), "row {} claimed twice", row.id);
            }
        }
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn requeue_is_compare_and_set_on_retry_count() {
        let repo = repo().await;
        let row = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        repo.claim_batch(1, Utc::now()).await.unwrap();

        let when = Utc::now();
        assert!(!repo.requeue(&row.id, 1, when, "stale view", when).await.unwrap());
        assert!(repo.requeue(&row.id, 0, when, "first", when).await.unwrap());
        // Already queued again: a second writer with the same view loses.
        assert!(!repo.requeue(&row.id, 0, when, "second", when).await.unwrap());
    }

    #[tokio::test]
    async fn retry_count_never_exceeds_max() {
        let repo = repo().await;
        let row = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        let past = Utc::now() - Duration::seconds(1);

        for expected in 0..2 {
            repo.claim_batch(1, Utc::now()).await.unwrap();
            assert!(repo.requeue(&row.id, expected, past, "e", Utc::now()).await.unwrap());
        }
        repo.claim_batch(1, Utc::now()).await.unwrap();
        // retry_count + 1 == max_retries: requeue refused, exhaust applies.
        assert!(!repo.requeue(&row.id, 2, past, "e", Utc::now()).await.unwrap());
        assert!(repo.exhaust(&row.id, 2, "gave up", Utc::now()).await.unwrap());

        let failed = repo.get(&row.id).await.unwrap().unwrap();
        assert_eq!(failed.status, WebhookStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert!(failed.retry_count <= failed.max_retries);
        assert!(failed.processed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_only_applies_to_queued_rows() {
        let repo = repo().await;
        let queued = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        assert!(repo.cancel(&queued.id, Utc::now()).await.unwrap());
        assert!(!repo.cancel(&queued.id, Utc::now()).await.unwrap());

        let claimed = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        repo.claim_batch(1, Utc::now()).await.unwrap();
        assert!(!repo.cancel(&claimed.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn finish_requires_processing() {
        let repo = repo().await;
        let row = repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        assert!(!repo.finish(&row.id, WebhookStatus::Sent, None, Utc::now()).await.unwrap());

        repo.claim_batch(1, Utc::now()).await.unwrap();
        assert!(repo.finish(&row.id, WebhookStatus::Sent, None, Utc::now()).await.unwrap());
        assert!(!repo
            .finish(&row.id, WebhookStatus::Failed, Some("late"), Utc::now())
            .await
            .unwrap());
        assert_eq!(repo.get(&row.id).await.unwrap().unwrap().status, WebhookStatus::Sent);
    }

    #[tokio::test]
    async fn stale_listing_and_counts() {
        let repo = repo().await;
        repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        repo.enqueue(&new_webhook(None, 5), Utc::now()).await.unwrap();
        let claimed_at = Utc::now() - Duration::minutes(30);
        repo.claim_batch(1, claimed_at).await.unwrap();

        let stale = repo
            .list_stale(Utc::now() - Duration::minutes(10), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert!(repo
            .list_stale(Utc::now() - Duration::hours(1), 10)
            .await
            .unwrap()
            .is_empty());

        let counts = repo.count_by_status().await.unwrap();
        assert!(counts.contains(&(WebhookStatus::Queued, 1)));
        assert!(counts.contains(&(WebhookStatus::Processing, 1)));
    }
}
