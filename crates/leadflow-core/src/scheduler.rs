//! Maintenance scheduler wrapping `tokio-cron-scheduler`.
//!
//! Schedules accept cron expressions (5 or 6 fields) or short English
//! phrases such as "every 30 seconds" or "hourly". A tick that fires while
//! the previous run of the same job is still going is skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use leadflow_types::config::SchedulerConfig;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::jobs::JobKind;
use crate::orchestrator::Orchestrator;
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::webhook::WebhookQueueRepository;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler error: {0}")]
    JobError(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Normalize a schedule string to a 6-field cron expression.
///
/// Supported forms (case-insensitive):
/// - "every N seconds" -> "*/N * * * * *"
/// - "every N minutes" -> "0 */N * * * *"
/// - "every N hours"   -> "0 0 */N * * *"
/// - "every minute" / "minutely", "every hour" / "hourly", "every day" / "daily"
/// - "every day at HH:MM"
/// - a 5-field cron (seconds prepended) or a 6-field cron (unchanged)
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at) = rest.strip_prefix("day at ") {
            let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
            let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
            let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
            if hour >= 24 || minute >= 60 {
                return Err(invalid());
            }
            return Ok(format!("0 {minute} {hour} * * *"));
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if let [count, unit] = words.as_slice() {
            let n: u32 = count.parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            return match unit.trim_end_matches('s') {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(invalid()),
            };
        }
        return Err(invalid());
    }

    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {trimmed}")),
        6 => Ok(trimmed.to_string()),
        _ => Err(SchedulerError::InvalidSchedule(format!(
            "unrecognized schedule format: '{trimmed}'"
        ))),
    }
}

/// Invoked each time a job's schedule fires.
pub type JobCallback = Arc<dyn Fn(JobKind) -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduledJob {
    job_id: Uuid,
    cron_expr: String,
}

pub struct MaintenanceScheduler {
    inner: RwLock<Option<JobScheduler>>,
    jobs: RwLock<HashMap<JobKind, ScheduledJob>>,
}

impl MaintenanceScheduler {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.inner.write().await = Some(scheduler);
        tracing::info!("maintenance scheduler started");
        Ok(())
    }

    /// Stop the scheduler and forget every job.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("maintenance scheduler stopped");
        }
        self.jobs.write().await.clear();
        Ok(())
    }

    /// Register `job` on `schedule`, replacing any earlier registration.
    pub async fn schedule(
        &self,
        job: JobKind,
        schedule: &str,
        callback: JobCallback,
    ) -> Result<(), SchedulerError> {
        let cron_expr = normalize_schedule(schedule)?;

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::JobError("scheduler not started".to_string()))?;

        let running = Arc::new(AtomicBool::new(false));
        let cron_job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let cb = callback.clone();
            let running = Arc::clone(&running);
            Box::pin(async move {
                if running.swap(true, Ordering::AcqRel) {
                    tracing::debug!(job = %job, "previous run still active, skipping tick");
                    return;
                }
                cb(job).await;
                running.store(false, Ordering::Release);
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = cron_job.guid();
        scheduler
            .add(cron_job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let previous = self.jobs.write().await.insert(
            job,
            ScheduledJob {
                job_id,
                cron_expr: cron_expr.clone(),
            },
        );
        if let Some(previous) = previous {
            scheduler
                .remove(&previous.job_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }

        tracing::info!(job = %job, cron = %cron_expr, "maintenance job scheduled");
        Ok(())
    }

    /// Registered jobs and their normalized cron expressions.
    pub async fn scheduled_jobs(&self) -> Vec<(JobKind, String)> {
        let jobs = self.jobs.read().await;
        JobKind::ALL
            .into_iter()
            .filter_map(|kind| jobs.get(&kind).map(|j| (kind, j.cron_expr.clone())))
            .collect()
    }

    /// Register every maintenance job against `orchestrator`. An empty
    /// schedule string disables that job.
    pub async fn schedule_all<Q, W, A, M, E>(
        &self,
        orchestrator: Arc<Orchestrator<Q, W, A, M, E>>,
        config: &SchedulerConfig,
    ) -> Result<(), SchedulerError>
    where
        Q: WebhookQueueRepository + 'static,
        W: WorkflowRepository + 'static,
        A: ApprovalRepository + 'static,
        M: MonitoringRepository + 'static,
        E: WorkflowEngine + 'static,
    {
        for job in JobKind::ALL {
            let schedule = config.schedule_for(job.as_str());
            if schedule.trim().is_empty() {
                tracing::info!(job = %job, "maintenance job disabled");
                continue;
            }
            let orchestrator = Arc::clone(&orchestrator);
            let callback: JobCallback = Arc::new(move |job| {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    orchestrator.run_job_logged(job).await;
                })
            });
            self.schedule(job, schedule, callback).await?;
        }
        Ok(())
    }
}

impl Default for MaintenanceScheduler {
    fn default() -> Self {
        Self::new()
    }
}
