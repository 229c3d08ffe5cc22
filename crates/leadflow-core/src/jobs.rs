//! Periodic maintenance jobs.
//!
//! Each job is idempotent and safe to run concurrently with itself: all the
//! state it touches moves through compare-and-set transitions, so an
//! overlapping run simply finds less to do.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use leadflow_types::monitoring::{EventRefs, EventType};
use serde::Serialize;
use serde_json::json;

use crate::engine::WorkflowEngine;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::webhook::WebhookQueueRepository;
use crate::repository::workflow::WorkflowRepository;

/// Rows examined per sweep.
const SWEEP_LIMIT: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProcessQueueBatch,
    RetryFailedWebhooks,
    ExpireOldApprovals,
    CleanupOldEvents,
    SyncRegistry,
    PollRunningExecutions,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::ProcessQueueBatch,
        JobKind::RetryFailedWebhooks,
        JobKind::ExpireOldApprovals,
        JobKind::CleanupOldEvents,
        JobKind::SyncRegistry,
        JobKind::PollRunningExecutions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ProcessQueueBatch => "process_queue_batch",
            JobKind::RetryFailedWebhooks => "retry_failed_webhooks",
            JobKind::ExpireOldApprovals => "expire_old_approvals",
            JobKind::CleanupOldEvents => "cleanup_old_events",
            JobKind::SyncRegistry => "sync_registry",
            JobKind::PollRunningExecutions => "poll_running_executions",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown job: '{s}'"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub detail: serde_json::Value,
}

impl<Q, W, A, M, E> Orchestrator<Q, W, A, M, E>
where
    Q: WebhookQueueRepository + 'static,
    W: WorkflowRepository + 'static,
    A: ApprovalRepository + 'static,
    M: MonitoringRepository + 'static,
    E: WorkflowEngine + 'static,
{
    /// Run one maintenance job to completion.
    pub async fn run_job(&self, job: JobKind) -> Result<JobReport, OrchestratorError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let detail = match job {
            JobKind::ProcessQueueBatch => json!(self.dispatcher.process_batch().await?),
            JobKind::RetryFailedWebhooks => {
                json!(self.queue.reclaim_stale(SWEEP_LIMIT).await?)
            }
            JobKind::ExpireOldApprovals => json!(self.gate.expire_overdue(SWEEP_LIMIT).await?),
            JobKind::CleanupOldEvents => {
                let retention = chrono::Duration::days(self.config.monitoring.retention_days);
                let deleted = self
                    .monitor
                    .cleanup(retention, self.config.monitoring.cleanup_batch_size)
                    .await?;
                json!({ "deleted": deleted })
            }
            JobKind::SyncRegistry => {
                json!(self.registry.sync(self.executor.engine().as_ref()).await?)
            }
            JobKind::PollRunningExecutions => {
                let running = self.executor.poll_running(SWEEP_LIMIT).await?;
                let pending = self.executor.recover_pending(SWEEP_LIMIT).await?;
                json!({ "running": running, "pending": pending })
            }
        };

        let report = JobReport {
            job,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            detail,
        };
        tracing::debug!(job = %job, duration_ms = report.duration_ms, "maintenance job finished");
        Ok(report)
    }

    /// Run a job from the scheduler. Failures are logged and recorded as
    /// `critical` events; they never propagate.
    pub async fn run_job_logged(&self, job: JobKind) -> Option<JobReport> {
        match self.run_job(job).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(job = %job, error = %e, "maintenance job failed");
                self.monitor
                    .critical(
                        EventType::JobFailed,
                        EventRefs::default(),
                        json!({ "job": job, "error": e.to_string() }),
                    )
                    .await;
                None
            }
        }
    }
}
