//! Monitoring event repository trait.

use chrono::{DateTime, Utc};
use leadflow_types::error::RepositoryError;
use leadflow_types::monitoring::{EventFilter, MonitoringEvent, Severity};

/// Append-only event storage.
pub trait MonitoringRepository: Send + Sync {
    fn insert(
        &self,
        event: &MonitoringEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Newest first.
    fn query(
        &self,
        filter: &EventFilter,
    ) -> impl std::future::Future<Output = Result<Vec<MonitoringEvent>, RepositoryError>> + Send;

    fn count_by_severity(
        &self,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<(Severity, u64)>, RepositoryError>> + Send;

    /// Event-type names are returned as stored.
    fn count_by_type(
        &self,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<(String, u64)>, RepositoryError>> + Send;

    /// Delete at most `batch_size` events created before `cutoff`, oldest
    /// first. Returns the number deleted.
    fn delete_batch_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
