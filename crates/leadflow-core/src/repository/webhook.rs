//! Webhook queue repository trait.

use chrono::{DateTime, Utc};
use leadflow_types::error::RepositoryError;
use leadflow_types::webhook::{EnqueueOutcome, NewWebhook, QueuedWebhook, WebhookStatus};
use uuid::Uuid;

/// Durable storage for the priority webhook queue.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WebhookQueueRepository: Send + Sync {
    /// Insert a `queued` row, or return the live row with the same
    /// idempotency key (`duplicate = true`).
    fn enqueue(
        &self,
        webhook: &NewWebhook,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<EnqueueOutcome, RepositoryError>> + Send;

    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<QueuedWebhook>, RepositoryError>> + Send;

    /// List rows newest first, optionally filtered by status.
    fn list(
        &self,
        status: Option<WebhookStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<QueuedWebhook>, RepositoryError>> + Send;

    /// Atomically move up to `limit` due `queued` rows to `processing`,
    /// highest priority first, then oldest first.
    fn claim_batch(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<QueuedWebhook>, RepositoryError>> + Send;

    /// `processing -> to` for a terminal `to`. `error` overwrites `last_error`
    /// when given.
    fn finish(
        &self,
        id: &Uuid,
        to: WebhookStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// `processing -> queued` with `retry_count` bumped, guarded on the
    /// retry count the caller observed.
    fn requeue(
        &self,
        id: &Uuid,
        expected_retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// `processing -> failed` with `retry_count` bumped, guarded on the
    /// retry count the caller observed.
    fn exhaust(
        &self,
        id: &Uuid,
        expected_retry_count: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// `queued -> cancelled`.
    fn cancel(
        &self,
        id: &Uuid,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Rows stuck in `processing` since before `claimed_before`.
    fn list_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<QueuedWebhook>, RepositoryError>> + Send;

    fn count_by_status(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(WebhookStatus, u64)>, RepositoryError>> + Send;
}
