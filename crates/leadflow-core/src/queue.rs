//! Durable priority webhook queue.
//!
//! Wraps `WebhookQueueRepository` with validation, backoff bookkeeping and
//! monitoring. Every state change goes through one guarded repository call,
//! so any number of workers can share a queue without coordination.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leadflow_types::error::{ErrorKind, RepositoryError};
use leadflow_types::monitoring::{EventRefs, EventType};
use leadflow_types::webhook::{
    EnqueueOutcome, FailOutcome, NewWebhook, QueuedWebhook, WebhookStatus,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::backoff::RetryPolicy;
use crate::monitor::EventMonitor;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::webhook::WebhookQueueRepository;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid webhook: {0}")]
    Validation(String),

    #[error("webhook {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Validation(_) => ErrorKind::Validation,
            QueueError::NotFound(_) => ErrorKind::NotFound,
            QueueError::Repository(e) => e.kind(),
        }
    }
}

/// Result of a stale-claim sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub requeued: u32,
    pub failed: u32,
    /// Rows another worker resolved between listing and reclaiming.
    pub skipped: u32,
}

pub struct WebhookQueue<Q: WebhookQueueRepository, M: MonitoringRepository> {
    repo: Q,
    monitor: Arc<EventMonitor<M>>,
    policy: RetryPolicy,
    processing_timeout: Duration,
}

impl<Q: WebhookQueueRepository, M: MonitoringRepository> WebhookQueue<Q, M> {
    pub fn new(
        repo: Q,
        monitor: Arc<EventMonitor<M>>,
        policy: RetryPolicy,
        processing_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            monitor,
            policy,
            processing_timeout,
        }
    }

    /// Persist an inbound event. Re-delivery of a live event returns the
    /// existing row's id.
    pub async fn enqueue(&self, webhook: NewWebhook) -> Result<EnqueueOutcome, QueueError> {
        if webhook.event_type.trim().is_empty() {
            return Err(QueueError::Validation("event type is empty".to_string()));
        }
        if !webhook.payload.is_object() && !webhook.payload.is_array() {
            return Err(QueueError::Validation(
                "payload must be a JSON object or array".to_string(),
            ));
        }

        let normalized = NewWebhook {
            priority: webhook.clamped_priority(),
            ..webhook
        };
        let outcome = self.repo.enqueue(&normalized, Utc::now()).await?;

        let refs = EventRefs::webhook(outcome.id);
        if outcome.duplicate {
            tracing::debug!(webhook_id = %outcome.id, "duplicate webhook delivery");
            self.monitor
                .info(
                    EventType::WebhookDuplicate,
                    refs,
                    json!({ "event_type": normalized.event_type, "source": normalized.source }),
                )
                .await;
        } else {
            tracing::info!(
                webhook_id = %outcome.id,
                event_type = %normalized.event_type,
                priority = normalized.priority,
                "webhook enqueued"
            );
            self.monitor
                .info(
                    EventType::WebhookReceived,
                    refs,
                    json!({
                        "event_type": normalized.event_type,
                        "source": normalized.source,
                        "priority": normalized.priority,
                    }),
                )
                .await;
        }
        Ok(outcome)
    }

    /// Claim up to `limit` due rows for this worker.
    pub async fn claim_batch(&self, limit: u32) -> Result<Vec<QueuedWebhook>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let claimed = self.repo.claim_batch(limit, Utc::now()).await?;
        if !claimed.is_empty() {
            tracing::debug!(count = claimed.len(), "claimed webhook batch");
        }
        Ok(claimed)
    }

    /// `processing -> sent` once `executions` executions exist for the row.
    /// Returns `false` if the row was not `processing`.
    pub async fn complete(&self, id: &Uuid, executions: usize) -> Result<bool, QueueError> {
        let moved = self
            .repo
            .finish(id, WebhookStatus::Sent, None, Utc::now())
            .await?;
        if moved {
            self.monitor
                .info(
                    EventType::WebhookDispatched,
                    EventRefs::webhook(*id),
                    json!({ "executions": executions }),
                )
                .await;
        }
        Ok(moved)
    }

    /// `processing -> cancelled` for an event nothing subscribes to.
    pub async fn discard_unmatched(&self, webhook: &QueuedWebhook) -> Result<bool, QueueError> {
        let moved = self
            .repo
            .finish(
                &webhook.id,
                WebhookStatus::Cancelled,
                Some("no active workflow matches this event"),
                Utc::now(),
            )
            .await?;
        if moved {
            tracing::warn!(
                webhook_id = %webhook.id,
                event_type = %webhook.event_type,
                "no active workflow for event"
            );
            self.monitor
                .warning(
                    EventType::WebhookUnmatched,
                    EventRefs::webhook(webhook.id),
                    json!({ "event_type": webhook.event_type }),
                )
                .await;
        }
        Ok(moved)
    }

    /// Record a retryable failure on a claimed row.
    ///
    /// Requeues with backoff while `retry_count < max_retries`, otherwise
    /// fails the row for good.
    pub async fn fail_transient(
        &self,
        webhook: &QueuedWebhook,
        error: &str,
    ) -> Result<FailOutcome, QueueError> {
        let now = Utc::now();
        let retry_count = webhook.retry_count + 1;

        if RetryPolicy::should_retry(retry_count, webhook.max_retries) {
            let next_retry_at = now + self.policy.chrono_delay_for(retry_count);
            let moved = self
                .repo
                .requeue(&webhook.id, webhook.retry_count, next_retry_at, error, now)
                .await?;
            if !moved {
                return Ok(FailOutcome::NotProcessing);
            }
            tracing::info!(
                webhook_id = %webhook.id,
                retry_count,
                %next_retry_at,
                "webhook requeued for retry"
            );
            self.monitor
                .warning(
                    EventType::WebhookRetryScheduled,
                    EventRefs::webhook(webhook.id),
                    json!({
                        "retry_count": retry_count,
                        "next_retry_at": next_retry_at,
                        "error": error,
                    }),
                )
                .await;
            Ok(FailOutcome::Requeued {
                retry_count,
                next_retry_at,
            })
        } else {
            let moved = self
                .repo
                .exhaust(&webhook.id, webhook.retry_count, error, now)
                .await?;
            if !moved {
                return Ok(FailOutcome::NotProcessing);
            }
            tracing::error!(webhook_id = %webhook.id, retry_count, %error, "webhook retries exhausted");
            self.monitor
                .error(
                    EventType::WebhookFailed,
                    EventRefs::webhook(webhook.id),
                    json!({ "retry_count": retry_count, "error": error }),
                )
                .await;
            Ok(FailOutcome::Failed { retry_count })
        }
    }

    /// Fail a claimed row without retry (the payload itself is unusable).
    pub async fn fail_permanent(&self, id: &Uuid, error: &str) -> Result<bool, QueueError> {
        let moved = self
            .repo
            .finish(id, WebhookStatus::Failed, Some(error), Utc::now())
            .await?;
        if moved {
            tracing::warn!(webhook_id = %id, %error, "webhook failed permanently");
            self.monitor
                .error(
                    EventType::WebhookFailed,
                    EventRefs::webhook(*id),
                    json!({ "error": error, "permanent": true }),
                )
                .await;
        }
        Ok(moved)
    }

    /// Operator cancel of a row still waiting in the queue.
    pub async fn cancel(&self, id: &Uuid) -> Result<bool, QueueError> {
        if self.repo.get(id).await?.is_none() {
            return Err(QueueError::NotFound(*id));
        }
        let moved = self.repo.cancel(id, Utc::now()).await?;
        if moved {
            tracing::info!(webhook_id = %id, "webhook cancelled");
            self.monitor
                .info(EventType::WebhookCancelled, EventRefs::webhook(*id), json!({}))
                .await;
        }
        Ok(moved)
    }

    /// Treat rows stuck in `processing` past the liveness timeout as
    /// transient failures. Their worker is presumed dead.
    pub async fn reclaim_stale(&self, limit: u32) -> Result<ReclaimReport, QueueError> {
        let timeout = chrono::Duration::from_std(self.processing_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let claimed_before = Utc::now() - timeout;
        let stale = self.repo.list_stale(claimed_before, limit).await?;

        let mut report = ReclaimReport::default();
        for webhook in stale {
            self.monitor
                .warning(
                    EventType::WebhookReclaimed,
                    EventRefs::webhook(webhook.id),
                    json!({ "claimed_at": webhook.claimed_at }),
                )
                .await;
            match self
                .fail_transient(&webhook, "processing timed out (worker lost)")
                .await?
            {
                FailOutcome::Requeued { .. } => report.requeued += 1,
                FailOutcome::Failed { .. } => report.failed += 1,
                FailOutcome::NotProcessing => report.skipped += 1,
            }
        }
        Ok(report)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<QueuedWebhook>, QueueError> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn list(
        &self,
        status: Option<WebhookStatus>,
        limit: u32,
    ) -> Result<Vec<QueuedWebhook>, QueueError> {
        Ok(self.repo.list(status, limit).await?)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(WebhookStatus, u64)>, QueueError> {
        Ok(self.repo.count_by_status().await?)
    }

    /// Rows not yet terminal (`queued` + `processing`).
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let counts = self.repo.count_by_status().await?;
        Ok(counts
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, n)| n)
            .sum())
    }
}
