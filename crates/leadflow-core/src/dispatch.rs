//! Queue dispatcher: turns claimed webhooks into executions.
//!
//! A webhook is `sent` once its executions exist. Whatever happens to them
//! afterwards (engine rejection, timeout, approval expiry) is tracked on the
//! execution, never by re-queueing the webhook.

use std::sync::Arc;

use leadflow_types::error::ErrorKind;
use leadflow_types::webhook::{FailOutcome, QueuedWebhook};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::approval::auto::{AutoApprover, AutoDecision};
use crate::engine::WorkflowEngine;
use crate::executor::{TriggerOutcome, WorkflowExecutor};
use crate::queue::{QueueError, WebhookQueue};
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::webhook::WebhookQueueRepository;
use crate::repository::workflow::WorkflowRepository;

/// What one `process_batch` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: u32,
    pub dispatched: u32,
    pub executions_created: u32,
    pub awaiting_approval: u32,
    pub auto_approved: u32,
    pub unmatched: u32,
    pub requeued: u32,
    pub failed: u32,
}

#[derive(Debug, Default)]
struct RowReport {
    dispatched: bool,
    executions: u32,
    awaiting: u32,
    auto_approved: u32,
    unmatched: bool,
    requeued: bool,
    failed: bool,
}

pub struct Dispatcher<Q, W, A, M, E>
where
    Q: WebhookQueueRepository,
    W: WorkflowRepository,
    A: ApprovalRepository,
    M: MonitoringRepository,
    E: WorkflowEngine,
{
    queue: Arc<WebhookQueue<Q, M>>,
    executor: Arc<WorkflowExecutor<W, A, M, E>>,
    auto: Arc<AutoApprover<W, A, M, E>>,
    batch_size: u32,
}

impl<Q, W, A, M, E> Dispatcher<Q, W, A, M, E>
where
    Q: WebhookQueueRepository + 'static,
    W: WorkflowRepository + 'static,
    A: ApprovalRepository + 'static,
    M: MonitoringRepository + 'static,
    E: WorkflowEngine + 'static,
{
    pub fn new(
        queue: Arc<WebhookQueue<Q, M>>,
        executor: Arc<WorkflowExecutor<W, A, M, E>>,
        auto: Arc<AutoApprover<W, A, M, E>>,
        batch_size: u32,
    ) -> Self {
        Self {
            queue,
            executor,
            auto,
            batch_size,
        }
    }

    /// Claim one batch and dispatch every row concurrently.
    pub async fn process_batch(self: &Arc<Self>) -> Result<BatchReport, QueueError> {
        let rows = self.queue.claim_batch(self.batch_size).await?;
        let mut report = BatchReport {
            claimed: rows.len() as u32,
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for row in rows {
            let this = Arc::clone(self);
            tasks.spawn(async move { this.dispatch_one(row).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(row) => {
                    report.dispatched += u32::from(row.dispatched);
                    report.executions_created += row.executions;
                    report.awaiting_approval += row.awaiting;
                    report.auto_approved += row.auto_approved;
                    report.unmatched += u32::from(row.unmatched);
                    report.requeued += u32::from(row.requeued);
                    report.failed += u32::from(row.failed);
                }
                Err(e) => {
                    // The row stays `processing` and the stale sweep picks it up.
                    tracing::error!(error = %e, "dispatch task panicked");
                }
            }
        }
        Ok(report)
    }

    async fn dispatch_one(&self, row: QueuedWebhook) -> RowReport {
        let mut report = RowReport::default();
        let outcomes = match self
            .executor
            .trigger(
                &row.event_type,
                row.payload.clone(),
                Some(row.id),
                row.target_workflow_id,
            )
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                let message = e.to_string();
                let result = if e.kind() == ErrorKind::Validation {
                    self.queue
                        .fail_permanent(&row.id, &message)
                        .await
                        .map(|_| FailOutcome::Failed {
                            retry_count: row.retry_count,
                        })
                } else {
                    self.queue.fail_transient(&row, &message).await
                };
                match result {
                    Ok(FailOutcome::Requeued { .. }) => report.requeued = true,
                    Ok(FailOutcome::Failed { .. }) => report.failed = true,
                    Ok(FailOutcome::NotProcessing) => {}
                    Err(qe) => {
                        tracing::error!(webhook_id = %row.id, error = %qe, "could not record dispatch failure");
                    }
                }
                return report;
            }
        };

        if outcomes.is_empty() {
            match self.queue.discard_unmatched(&row).await {
                Ok(_) => report.unmatched = true,
                Err(e) => tracing::error!(webhook_id = %row.id, error = %e, "could not discard unmatched webhook"),
            }
            return report;
        }

        for outcome in &outcomes {
            report.executions += 1;
            match outcome {
                TriggerOutcome::ReadyToStart { execution, .. } => {
                    self.executor.spawn_start(execution.id);
                }
                TriggerOutcome::AwaitingApproval {
                    definition,
                    approval,
                    ..
                } => {
                    report.awaiting += 1;
                    if definition.auto_approval_enabled {
                        match self.auto.evaluate(approval.id).await {
                            Ok(AutoDecision::Approved { .. }) => report.auto_approved += 1,
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(approval_id = %approval.id, error = %e, "auto-approval evaluation failed");
                            }
                        }
                    }
                }
            }
        }

        match self.queue.complete(&row.id, outcomes.len()).await {
            Ok(true) => {
                report.dispatched = true;
                tracing::debug!(webhook_id = %row.id, executions = outcomes.len(), "webhook dispatched");
            }
            Ok(false) => {
                tracing::warn!(webhook_id = %row.id, "webhook left processing before completion");
            }
            Err(e) => tracing::error!(webhook_id = %row.id, error = %e, "could not mark webhook sent"),
        }
        report
    }
}
