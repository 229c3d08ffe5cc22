//! Event monitor: append-only lifecycle log plus its read paths.
//!
//! `log` never fails from the caller's point of view. A storage error while
//! recording an event is reported through `tracing` and swallowed, so
//! monitoring can never break a business operation.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use leadflow_types::error::RepositoryError;
use leadflow_types::monitoring::{
    DashboardSummary, EventFilter, EventRefs, EventType, MonitoringEvent, Severity,
};

use crate::repository::monitoring::MonitoringRepository;

/// Counts from the other components, folded into the dashboard.
#[derive(Debug, Clone, Default)]
pub struct OperationalSnapshot {
    pub queue_by_status: BTreeMap<String, u64>,
    pub executions_by_status: BTreeMap<String, u64>,
    pub pending_approvals: u64,
}

pub struct EventMonitor<M: MonitoringRepository> {
    repo: M,
}

impl<M: MonitoringRepository> EventMonitor<M> {
    pub fn new(repo: M) -> Self {
        Self { repo }
    }

    /// Record one event.
    pub async fn log(
        &self,
        event_type: EventType,
        severity: Severity,
        refs: EventRefs,
        payload: serde_json::Value,
    ) {
        let event = MonitoringEvent::new(event_type, severity, refs, payload);
        if let Err(e) = self.repo.insert(&event).await {
            tracing::warn!(
                event_type = %event.event_type,
                error = %e,
                "failed to record monitoring event"
            );
        }
    }

    pub async fn info(&self, event_type: EventType, refs: EventRefs, payload: serde_json::Value) {
        self.log(event_type, Severity::Info, refs, payload).await;
    }

    pub async fn warning(
        &self,
        event_type: EventType,
        refs: EventRefs,
        payload: serde_json::Value,
    ) {
        self.log(event_type, Severity::Warning, refs, payload).await;
    }

    pub async fn error(&self, event_type: EventType, refs: EventRefs, payload: serde_json::Value) {
        self.log(event_type, Severity::Error, refs, payload).await;
    }

    pub async fn critical(
        &self,
        event_type: EventType,
        refs: EventRefs,
        payload: serde_json::Value,
    ) {
        self.log(event_type, Severity::Critical, refs, payload).await;
    }

    /// Events at `error` or `critical` since `since`, newest first.
    pub async fn errors(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MonitoringEvent>, RepositoryError> {
        self.repo
            .query(&EventFilter {
                since: Some(since),
                min_severity: Some(Severity::Error),
                limit: Some(limit),
                ..Default::default()
            })
            .await
    }

    pub async fn query(&self, filter: &EventFilter) -> Result<Vec<MonitoringEvent>, RepositoryError> {
        self.repo.query(filter).await
    }

    /// Share of events since `since` at `error` or above. `0.0` with no events.
    pub async fn error_rate(&self, since: DateTime<Utc>) -> Result<f64, RepositoryError> {
        let counts = self.repo.count_by_severity(since).await?;
        Ok(error_rate_of(&counts))
    }

    /// Aggregate counts over `[now - window, now]`.
    pub async fn dashboard(
        &self,
        window: Duration,
        ops: OperationalSnapshot,
    ) -> Result<DashboardSummary, RepositoryError> {
        let now = Utc::now();
        let since = now - window;

        let severities = self.repo.count_by_severity(since).await?;
        let types = self.repo.count_by_type(since).await?;
        let recent_errors = self.errors(since, 10).await?;

        let mut by_severity: BTreeMap<String, u64> = Severity::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for (sev, n) in &severities {
            by_severity.insert(sev.to_string(), *n);
        }

        Ok(DashboardSummary {
            window_start: since,
            window_end: now,
            total_events: severities.iter().map(|(_, n)| n).sum(),
            by_severity,
            by_type: types.into_iter().collect(),
            queue_by_status: ops.queue_by_status,
            executions_by_status: ops.executions_by_status,
            pending_approvals: ops.pending_approvals,
            error_rate: error_rate_of(&severities),
            recent_errors,
        })
    }

    /// Delete events older than `retention`, `batch_size` rows at a time.
    ///
    /// Stops when a batch comes back short, so each delete holds the write
    /// lock only briefly.
    pub async fn cleanup(&self, retention: Duration, batch_size: u32) -> Result<u64, RepositoryError> {
        let cutoff = Utc::now() - retention;
        let batch_size = batch_size.max(1);
        let mut total = 0u64;
        loop {
            let deleted = self.repo.delete_batch_before(cutoff, batch_size).await?;
            total += deleted;
            if deleted < u64::from(batch_size) {
                break;
            }
            tokio::task::yield_now().await;
        }
        if total > 0 {
            tracing::info!(deleted = total, %cutoff, "pruned monitoring events");
        }
        Ok(total)
    }
}

fn error_rate_of(counts: &[(Severity, u64)]) -> f64 {
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return 0.0;
    }
    let errors: u64 = counts
        .iter()
        .filter(|(sev, _)| *sev >= Severity::Error)
        .map(|(_, n)| n)
        .sum();
    errors as f64 / total as f64
}
