//! End-to-end flows through the orchestrator on a real SQLite database.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{
    definition, fast_settings, gated_definition, harness, harness_with, harness_with_scorer,
};
use leadflow_core::approval::auto::{AutoDecision, ConfidenceScorer, DeferReason};
use leadflow_core::approval::gate::DecisionOutcome;
use leadflow_core::executor::{
    EXECUTION_CANCELLED, ReconcileOutcome, StartOutcome, TriggerOutcome,
};
use leadflow_core::jobs::JobKind;
use leadflow_types::approval::{ApprovalStatus, ScoringInput};
use leadflow_types::config::OrchestratorConfig;
use leadflow_types::engine::{RemoteExecutionState, RemoteWorkflow};
use leadflow_types::monitoring::{EventFilter, EventType};
use leadflow_types::webhook::{NewWebhook, WebhookStatus};
use leadflow_types::workflow::{
    failure_reason, ExecutionFilter, ExecutionResult, ExecutionStatus, NewWorkflowDefinition,
};
use serde_json::json;

fn webhook(key: Option<&str>, event: &str, payload: serde_json::Value) -> NewWebhook {
    NewWebhook {
        idempotency_key: key.map(str::to_string),
        source: "crm".to_string(),
        event_type: event.to_string(),
        payload,
        target_workflow_id: None,
        priority: 5,
        max_retries: 3,
    }
}

#[tokio::test]
async fn duplicate_delivery_is_stored_once() {
    let h = harness().await;
    let queue = &h.orchestrator.queue;

    let first = queue
        .enqueue(webhook(Some("k1"), "lead.created", json!({"lead_id": 1})))
        .await
        .unwrap();
    let second = queue
        .enqueue(webhook(Some("k1"), "lead.created", json!({"lead_id": 1})))
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.id, second.id);
    assert_eq!(queue.list(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn gated_workflow_waits_for_approval_without_calling_engine() {
    let h = harness().await;
    h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;

    h.orchestrator
        .queue
        .enqueue(webhook(None, "campaign.launched", json!({"campaign_id": 9})))
        .await
        .unwrap();
    let report = h.orchestrator.dispatcher.process_batch().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.executions_created, 1);
    assert_eq!(report.awaiting_approval, 1);

    let executions = h.orchestrator.executor.list(&ExecutionFilter::default()).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Pending);

    let approvals = h
        .orchestrator
        .gate
        .list(&Default::default())
        .await
        .unwrap();
    assert_eq!(approvals.len(), 1);
    let approval = &approvals[0];
    assert_eq!(approval.status, ApprovalStatus::Pending);
    assert_eq!(approval.execution_id, executions[0].id);
    let lifetime = approval.expires_at - approval.created_at;
    assert!((lifetime - Duration::hours(24)).num_seconds().abs() <= 1);

    assert_eq!(h.engine.start_calls(), 0);
}

#[tokio::test]
async fn approve_starts_and_reject_fails() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;

    let mut outcomes = Vec::new();
    for n in 0..2 {
        let mut batch = h
            .orchestrator
            .executor
            .trigger("campaign.launched", json!({"n": n}), None, Some(def.id))
            .await
            .unwrap();
        outcomes.append(&mut batch);
    }
    let approvals: Vec<_> = outcomes
        .iter()
        .map(|o| match o {
            TriggerOutcome::AwaitingApproval { approval, .. } => approval.clone(),
            other => panic!("expected approval, got {other:?}"),
        })
        .collect();

    let approved = h
        .orchestrator
        .gate
        .decide(approvals[0].id, true, "alice", None)
        .await
        .unwrap();
    assert!(matches!(approved, DecisionOutcome::Applied { ref approval } if approval.status == ApprovalStatus::Approved));
    let running = h
        .wait_for_status(approvals[0].execution_id, ExecutionStatus::Running)
        .await;
    assert!(running.external_execution_id.is_some());

    let rejected = h
        .orchestrator
        .gate
        .decide(approvals[1].id, false, "bob", Some("budget freeze".into()))
        .await
        .unwrap();
    match rejected {
        DecisionOutcome::Applied { approval } => {
            assert_eq!(approval.status, ApprovalStatus::Rejected);
            assert_eq!(approval.decided_by.as_deref(), Some("bob"));
            assert_eq!(approval.decision_reason.as_deref(), Some("budget freeze"));
        }
        other => panic!("expected applied, got {other:?}"),
    }
    let failed = h.execution(approvals[1].execution_id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some(failure_reason::APPROVAL_REJECTED));

    // A second decision on a decided request changes nothing.
    let again = h
        .orchestrator
        .gate
        .decide(approvals[1].id, true, "carol", None)
        .await
        .unwrap();
    assert!(matches!(again, DecisionOutcome::Conflict { current: ApprovalStatus::Rejected }));
    assert_eq!(h.engine.start_calls(), 1);
}

#[tokio::test]
async fn overdue_approval_expires_and_fails_execution() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let outcome = h
        .orchestrator
        .executor
        .trigger("campaign.launched", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0);
    let TriggerOutcome::AwaitingApproval { approval, execution, .. } = outcome else {
        panic!("expected approval");
    };

    h.backdate_approval(approval.id, Utc::now() - Duration::minutes(1)).await;
    let report = h.orchestrator.gate.expire_overdue(100).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.conflicts, 0);

    let expired = h.orchestrator.gate.get(&approval.id).await.unwrap();
    assert_eq!(expired.status, ApprovalStatus::Expired);
    let failed = h.execution(execution.id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some(failure_reason::APPROVAL_EXPIRED));

    // The sweep is idempotent.
    let again = h.orchestrator.gate.expire_overdue(100).await.unwrap();
    assert_eq!(again.expired, 0);
}

#[tokio::test]
async fn running_execution_past_timeout_fails_but_webhook_stays_sent() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;

    let enqueued = h
        .orchestrator
        .queue
        .enqueue(webhook(Some("lead-42"), "lead.created", json!({"lead_id": 42})))
        .await
        .unwrap();
    let report = h.orchestrator.dispatcher.process_batch().await.unwrap();
    assert_eq!(report.dispatched, 1);

    let execution = h
        .orchestrator
        .executor
        .list(&ExecutionFilter {
            workflow_id: Some(def.id),
            ..Default::default()
        })
        .await
        .unwrap()
        .remove(0);
    assert_eq!(execution.webhook_id, Some(enqueued.id));
    h.wait_for_status(execution.id, ExecutionStatus::Running).await;

    // The engine never reports back.
    h.backdate_start(execution.id, Utc::now() - Duration::hours(2)).await;
    let poll = h.orchestrator.executor.poll_running(50).await.unwrap();
    assert_eq!(poll.checked, 1);
    assert_eq!(poll.timed_out, 1);

    let timed_out = h.execution(execution.id).await;
    assert_eq!(timed_out.status, ExecutionStatus::Failed);
    assert_eq!(timed_out.error_message.as_deref(), Some(failure_reason::TIMEOUT));
    assert!(timed_out.completed_at.is_some());

    let row = h.orchestrator.queue.get(&enqueued.id).await.unwrap().unwrap();
    assert_eq!(row.status, WebhookStatus::Sent);
    assert_eq!(h.engine.cancelled(), vec!["ext-1".to_string()]);
}

#[tokio::test]
async fn poll_applies_finished_engine_results() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;

    let mut ids = Vec::new();
    for n in 0..3 {
        let outcome = h
            .orchestrator
            .executor
            .trigger("lead.created", json!({"n": n}), None, Some(def.id))
            .await
            .unwrap()
            .remove(0);
        let id = outcome.execution().id;
        let started = h.orchestrator.executor.start(id).await.unwrap();
        assert!(matches!(started, StartOutcome::Started { .. }));
        ids.push(id);
    }

    h.engine.set_status(
        "ext-1",
        RemoteExecutionState::Finished {
            result: ExecutionResult::Success {
                output: Some(json!({"emails_sent": 3})),
            },
        },
    );
    h.engine.set_status(
        "ext-2",
        RemoteExecutionState::Finished {
            result: ExecutionResult::Error {
                error: Some("smtp relay refused".into()),
            },
        },
    );

    let poll = h.orchestrator.executor.poll_running(50).await.unwrap();
    assert_eq!(poll.checked, 3);
    assert_eq!(poll.completed, 1);
    assert_eq!(poll.failed, 1);
    assert_eq!(poll.still_running, 1);

    let done = h.execution(ids[0]).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.output, Some(json!({"emails_sent": 3})));
    assert!(done.duration_ms.is_some());

    let broken = h.execution(ids[1]).await;
    assert_eq!(broken.status, ExecutionStatus::Failed);
    assert_eq!(broken.error_message.as_deref(), Some("smtp relay refused"));

    let stats = h.orchestrator.registry.get(&def.id).await.unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 1);
}

#[tokio::test]
async fn unmatched_event_is_cancelled_with_warning() {
    let h = harness().await;
    h.create(definition("lead-nurture", &["lead.created"])).await;

    let enqueued = h
        .orchestrator
        .queue
        .enqueue(webhook(None, "invoice.paid", json!({"invoice": 3})))
        .await
        .unwrap();
    let report = h.orchestrator.dispatcher.process_batch().await.unwrap();
    assert_eq!(report.unmatched, 1);
    assert_eq!(report.executions_created, 0);

    let row = h.orchestrator.queue.get(&enqueued.id).await.unwrap().unwrap();
    assert_eq!(row.status, WebhookStatus::Cancelled);
    assert!(row.last_error.is_some());

    let events = h
        .orchestrator
        .monitor
        .query(&Default::default())
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.event_type.as_str() == "webhook.unmatched"));
}

#[tokio::test]
async fn engine_rejection_fails_execution_without_retrying() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    h.engine.push_start_reply(Err(leadflow_core::engine::EngineError::Permanent {
        status: 422,
        message: "missing lead email".into(),
    }));

    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    let outcome = h.orchestrator.executor.start(id).await.unwrap();
    assert!(matches!(outcome, StartOutcome::Rejected { .. }));
    assert_eq!(h.engine.start_calls(), 1);

    let failed = h.execution(id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert!(failed.error_message.unwrap().contains("missing lead email"));
}

#[tokio::test]
async fn transient_start_failures_are_retried_in_call() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    h.engine
        .push_start_reply(Err(leadflow_core::engine::EngineError::Transient("502".into())));
    h.engine.push_start_reply(Err(leadflow_core::engine::EngineError::Timeout));

    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    let outcome = h.orchestrator.executor.start(id).await.unwrap();
    assert_eq!(
        outcome,
        StartOutcome::Started {
            external_execution_id: "ext-1".into()
        }
    );
    assert_eq!(h.engine.start_calls(), 3);
}

#[tokio::test]
async fn exhausted_start_attempts_fail_with_engine_timeout() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    for _ in 0..3 {
        h.engine.push_start_reply(Err(leadflow_core::engine::EngineError::Timeout));
    }

    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    let outcome = h.orchestrator.executor.start(id).await.unwrap();
    assert!(matches!(outcome, StartOutcome::Unavailable { .. }));
    let failed = h.execution(id).await;
    assert_eq!(failed.error_message.as_deref(), Some(failure_reason::ENGINE_TIMEOUT));
}

#[tokio::test]
async fn cancel_wins_over_late_completion() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    h.orchestrator.executor.start(id).await.unwrap();

    let cancelled = h.orchestrator.executor.cancel(id, "ops").await.unwrap();
    assert_eq!(cancelled.execution.status, ExecutionStatus::Cancelled);
    assert!(cancelled.engine_notified);

    let late = h
        .orchestrator
        .executor
        .reconcile(id, ExecutionResult::Success { output: None })
        .await
        .unwrap();
    assert_eq!(
        late,
        ReconcileOutcome::AlreadyTerminal {
            status: ExecutionStatus::Cancelled
        }
    );
    assert_eq!(h.execution(id).await.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn duplicate_completion_is_applied_once() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    h.orchestrator.executor.start(id).await.unwrap();

    let first = h
        .orchestrator
        .executor
        .reconcile(id, ExecutionResult::Success { output: Some(json!({"ok": true})) })
        .await
        .unwrap();
    let second = h
        .orchestrator
        .executor
        .reconcile(id, ExecutionResult::Error { error: Some("late".into()) })
        .await
        .unwrap();
    assert_eq!(first, ReconcileOutcome::Applied { status: ExecutionStatus::Completed });
    assert_eq!(second, ReconcileOutcome::AlreadyTerminal { status: ExecutionStatus::Completed });

    let stats = h.orchestrator.registry.get(&def.id).await.unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test]
async fn retry_chain_is_bounded() {
    let mut settings = fast_settings();
    settings.max_retries = 2;
    let h = harness_with(OrchestratorConfig::default(), settings).await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;

    let mut current = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({"lead_id": 5}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    h.orchestrator.executor.fail_pending(current, "smtp down").await.unwrap();

    for expected_count in 1..=2u32 {
        let outcome = h.orchestrator.executor.retry(current).await.unwrap();
        let attempt = outcome.execution().clone();
        assert_eq!(attempt.retry_count, expected_count);
        assert_eq!(attempt.retry_of, Some(current));
        assert_eq!(attempt.input, json!({"lead_id": 5}));
        h.wait_for_status(attempt.id, ExecutionStatus::Running).await;
        h.orchestrator
            .executor
            .reconcile(attempt.id, ExecutionResult::Error { error: None })
            .await
            .unwrap();
        current = attempt.id;
    }

    let err = h.orchestrator.executor.retry(current).await.unwrap_err();
    assert!(matches!(
        err,
        leadflow_core::executor::ExecutorError::RetryLimit { retry_count: 2, max: 2, .. }
    ));
    // History is kept: the original plus two retries.
    let all = h.orchestrator.executor.list(&ExecutionFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn retry_of_unfinished_execution_is_refused() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    let err = h.orchestrator.executor.retry(id).await.unwrap_err();
    assert!(matches!(
        err,
        leadflow_core::executor::ExecutorError::InvalidTransition { status: ExecutionStatus::Pending, .. }
    ));
}

#[tokio::test]
async fn transient_queue_failures_are_bounded() {
    let mut config = OrchestratorConfig::default();
    config.queue.backoff_secs = vec![0];
    let h = harness_with(config, fast_settings()).await;
    let queue = &h.orchestrator.queue;

    let id = queue
        .enqueue(webhook(None, "lead.created", json!({"lead_id": 8})))
        .await
        .unwrap()
        .id;

    let mut outcomes = Vec::new();
    loop {
        let claimed = queue.claim_batch(10).await.unwrap();
        let Some(row) = claimed.into_iter().next() else { break };
        outcomes.push(queue.fail_transient(&row, "engine 503").await.unwrap());
    }

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], leadflow_types::webhook::FailOutcome::Requeued { retry_count: 1, .. }));
    assert!(matches!(outcomes[1], leadflow_types::webhook::FailOutcome::Requeued { retry_count: 2, .. }));
    assert!(matches!(outcomes[2], leadflow_types::webhook::FailOutcome::Failed { retry_count: 3 }));

    let row = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(row.status, WebhookStatus::Failed);
    assert_eq!(row.retry_count, 3);
    assert_eq!(row.last_error.as_deref(), Some("engine 503"));
}

#[tokio::test]
async fn stale_claims_are_reclaimed() {
    let h = harness().await;
    let queue = &h.orchestrator.queue;
    let id = queue
        .enqueue(webhook(None, "lead.created", json!({})))
        .await
        .unwrap()
        .id;
    assert_eq!(queue.claim_batch(5).await.unwrap().len(), 1);

    h.backdate_claim(id, Utc::now() - Duration::hours(1)).await;
    let report = queue.reclaim_stale(10).await.unwrap();
    assert_eq!(report.requeued, 1);

    let row = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(row.status, WebhookStatus::Queued);
    assert_eq!(row.retry_count, 1);
    assert!(row.claimed_at.is_none());
}

async fn run_all_jobs(h: &common::Harness) {
    for job in JobKind::ALL {
        h.orchestrator.run_job(job).await.unwrap();
    }
}

#[tokio::test]
async fn orphaned_pending_execution_is_restarted_after_grace() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    // Created but never handed to `spawn_start`, as after a crash.
    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({"lead_id": 1}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;

    // Inside the grace period the sweep leaves it alone.
    run_all_jobs(&h).await;
    assert_eq!(h.execution(id).await.status, ExecutionStatus::Pending);
    assert_eq!(h.engine.start_calls(), 0);

    h.backdate_creation(id, Utc::now() - Duration::hours(1)).await;
    let report = h
        .orchestrator
        .run_job(JobKind::PollRunningExecutions)
        .await
        .unwrap();
    assert_eq!(report.detail["pending"]["restarted"], 1);
    let running = h.execution(id).await;
    assert_eq!(running.status, ExecutionStatus::Running);
    assert!(running.external_execution_id.is_some());

    run_all_jobs(&h).await;
    run_all_jobs(&h).await;
    assert_eq!(h.engine.start_calls(), 1);

    let recovered = h
        .orchestrator
        .monitor
        .query(&EventFilter {
            event_type: Some(EventType::ExecutionRecovered),
            execution_id: Some(id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].payload["action"], "restart");
}

#[tokio::test]
async fn approved_but_unstarted_execution_is_restarted() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let outcome = h
        .orchestrator
        .executor
        .trigger("campaign.launched", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0);
    let TriggerOutcome::AwaitingApproval { approval, execution, .. } = outcome else {
        panic!("expected approval");
    };

    // The approval committed, the process died before the start.
    h.force_approval_status(approval.id, ApprovalStatus::Approved).await;
    h.backdate_creation(execution.id, Utc::now() - Duration::hours(1)).await;

    h.orchestrator
        .run_job(JobKind::PollRunningExecutions)
        .await
        .unwrap();
    assert_eq!(h.execution(execution.id).await.status, ExecutionStatus::Running);
    assert_eq!(h.engine.started_executions(), vec![execution.id]);
}

#[tokio::test]
async fn rejection_that_could_not_fail_execution_is_finished_by_sweep() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let outcome = h
        .orchestrator
        .executor
        .trigger("campaign.launched", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0);
    let TriggerOutcome::AwaitingApproval { approval, execution, .. } = outcome else {
        panic!("expected approval");
    };

    h.exec(
        r#"CREATE TRIGGER refuse_failed BEFORE UPDATE OF status ON workflow_executions
           WHEN NEW.status = 'failed'
           BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END"#,
    )
    .await;

    // The rejection itself is committed and reported as applied.
    let rejected = h
        .orchestrator
        .gate
        .decide(approval.id, false, "bob", None)
        .await
        .unwrap();
    assert!(matches!(rejected, DecisionOutcome::Applied { ref approval } if approval.status == ApprovalStatus::Rejected));
    assert_eq!(h.execution(execution.id).await.status, ExecutionStatus::Pending);
    let errors = h
        .orchestrator
        .monitor
        .query(&EventFilter {
            event_type: Some(EventType::ExecutionFailed),
            execution_id: Some(execution.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["stage"], "reject");

    h.exec("DROP TRIGGER refuse_failed").await;
    h.backdate_creation(execution.id, Utc::now() - Duration::hours(1)).await;
    let report = h
        .orchestrator
        .run_job(JobKind::PollRunningExecutions)
        .await
        .unwrap();
    assert_eq!(report.detail["pending"]["failed"], 1);

    let failed = h.execution(execution.id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some(failure_reason::APPROVAL_REJECTED));
    assert_eq!(h.engine.start_calls(), 0);
}

#[tokio::test]
async fn gated_execution_without_request_gets_one() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let outcome = h
        .orchestrator
        .executor
        .trigger("campaign.launched", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0);
    let TriggerOutcome::AwaitingApproval { approval, execution, .. } = outcome else {
        panic!("expected approval");
    };
    // Crash between the execution insert and the request insert.
    h.exec(&format!("DELETE FROM approval_requests WHERE id = '{}'", approval.id))
        .await;
    h.backdate_creation(execution.id, Utc::now() - Duration::hours(1)).await;

    let report = h
        .orchestrator
        .run_job(JobKind::PollRunningExecutions)
        .await
        .unwrap();
    assert_eq!(report.detail["pending"]["gated"], 1);
    assert_eq!(h.orchestrator.gate.pending_count().await.unwrap(), 1);
    assert_eq!(h.execution(execution.id).await.status, ExecutionStatus::Pending);
    assert_eq!(h.engine.start_calls(), 0);

    // An open request keeps the execution out of later sweeps.
    let again = h
        .orchestrator
        .run_job(JobKind::PollRunningExecutions)
        .await
        .unwrap();
    assert_eq!(again.detail["pending"]["checked"], 0);
}

#[tokio::test]
async fn poll_times_out_the_longest_running_first() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    let mut ids = Vec::new();
    for n in 0..3 {
        let id = h
            .orchestrator
            .executor
            .trigger("lead.created", json!({"n": n}), None, Some(def.id))
            .await
            .unwrap()
            .remove(0)
            .execution()
            .id;
        h.orchestrator.executor.start(id).await.unwrap();
        ids.push(id);
    }
    // The first-created execution started most recently.
    h.backdate_start(ids[0], Utc::now() - Duration::minutes(1)).await;
    h.backdate_start(ids[2], Utc::now() - Duration::hours(3)).await;
    h.backdate_start(ids[1], Utc::now() - Duration::hours(2)).await;

    let poll = h.orchestrator.executor.poll_running(2).await.unwrap();
    assert_eq!(poll.checked, 2);
    assert_eq!(poll.timed_out, 2);
    assert_eq!(h.execution(ids[0]).await.status, ExecutionStatus::Running);
    assert_eq!(h.execution(ids[1]).await.status, ExecutionStatus::Failed);
    assert_eq!(h.execution(ids[2]).await.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn non_finite_confidence_is_never_auto_approved() {
    struct NanScorer;

    impl ConfidenceScorer for NanScorer {
        fn score(&self, _input: &ScoringInput) -> f64 {
            f64::NAN
        }

        fn name(&self) -> &str {
            "nan"
        }
    }

    let h = harness_with_scorer(
        OrchestratorConfig::default(),
        fast_settings(),
        Arc::new(NanScorer),
    )
    .await;
    let def = h
        .create(NewWorkflowDefinition {
            auto_approval_enabled: true,
            ..gated_definition("bulk-campaign", &["campaign.launched"])
        })
        .await;
    let outcome = h
        .orchestrator
        .executor
        .trigger(
            "campaign.launched",
            json!({"approval_context": {"quality_score": 99.0, "verified": true}}),
            None,
            Some(def.id),
        )
        .await
        .unwrap()
        .remove(0);
    let TriggerOutcome::AwaitingApproval { approval, execution, .. } = outcome else {
        panic!("expected approval");
    };

    let decision = h.orchestrator.auto.evaluate(approval.id).await.unwrap();
    assert_eq!(
        decision,
        AutoDecision::Deferred {
            confidence: None,
            reason: DeferReason::InvalidScore
        }
    );
    let stored = h.orchestrator.gate.get(&approval.id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Pending);
    assert!(!stored.auto_approved);
    assert!(stored.auto_approval_confidence.is_none());
    assert_eq!(h.execution(execution.id).await.status, ExecutionStatus::Pending);
    assert_eq!(h.engine.start_calls(), 0);
}

#[tokio::test]
async fn cancelling_gated_execution_closes_its_request() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let outcome = h
        .orchestrator
        .executor
        .trigger("campaign.launched", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0);
    let TriggerOutcome::AwaitingApproval { approval, execution, .. } = outcome else {
        panic!("expected approval");
    };

    h.orchestrator.executor.cancel(execution.id, "ops").await.unwrap();

    let closed = h.orchestrator.gate.get(&approval.id).await.unwrap();
    assert_eq!(closed.status, ApprovalStatus::Expired);
    assert_eq!(closed.decision_reason.as_deref(), Some(EXECUTION_CANCELLED));
    let expired = h
        .orchestrator
        .monitor
        .query(&EventFilter {
            event_type: Some(EventType::ApprovalExpired),
            execution_id: Some(execution.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].payload["cause"], EXECUTION_CANCELLED);
    assert_eq!(expired[0].payload["actor"], "ops");
}

#[tokio::test]
async fn registry_sync_creates_and_deactivates_but_never_reactivates() {
    let h = harness().await;
    let kept = h.create(definition("lead-nurture", &["lead.created"])).await;
    let gone = h.create(definition("old-drip", &["lead.stale"])).await;

    h.engine.set_workflows(vec![
        RemoteWorkflow {
            id: kept.external_workflow_id.clone(),
            name: "lead-nurture".into(),
            active: true,
            tags: vec![],
        },
        RemoteWorkflow {
            id: "wf-reactivation".into(),
            name: "reactivation".into(),
            active: true,
            tags: vec!["lead.dormant".into()],
        },
    ]);

    let report = h.orchestrator.registry.sync(&h.engine).await.unwrap();
    assert_eq!(report.created, vec!["reactivation".to_string()]);
    assert_eq!(report.deactivated, vec!["old-drip".to_string()]);

    assert!(!h.orchestrator.registry.get(&gone.id).await.unwrap().is_active);
    let resolved = h.orchestrator.registry.resolve("lead.dormant").await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].external_workflow_id, "wf-reactivation");

    // The vanished workflow comes back: sync leaves the local row inactive.
    h.engine.set_workflows(vec![RemoteWorkflow {
        id: gone.external_workflow_id.clone(),
        name: "old-drip".into(),
        active: true,
        tags: vec![],
    }]);
    h.orchestrator.registry.sync(&h.engine).await.unwrap();
    assert!(!h.orchestrator.registry.get(&gone.id).await.unwrap().is_active);
}

#[tokio::test]
async fn targeted_webhook_only_triggers_its_workflow() {
    let h = harness().await;
    let nurture = h.create(definition("lead-nurture", &["lead.created"])).await;
    h.create(definition("lead-score", &["lead.created"])).await;

    let resolved = h
        .orchestrator
        .registry
        .resolve_target("lead-nurture")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.id, nurture.id);

    h.orchestrator
        .queue
        .enqueue(NewWebhook {
            target_workflow_id: Some(nurture.id),
            ..webhook(None, "lead.created", json!({"lead_id": 1}))
        })
        .await
        .unwrap();
    let report = h.orchestrator.dispatcher.process_batch().await.unwrap();
    assert_eq!(report.executions_created, 1);

    h.orchestrator
        .queue
        .enqueue(webhook(None, "lead.created", json!({"lead_id": 2})))
        .await
        .unwrap();
    let report = h.orchestrator.dispatcher.process_batch().await.unwrap();
    assert_eq!(report.executions_created, 2);
}

#[tokio::test]
async fn maintenance_jobs_run_through_the_orchestrator() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let outcome = h
        .orchestrator
        .executor
        .trigger("campaign.launched", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0);
    let TriggerOutcome::AwaitingApproval { approval, .. } = outcome else {
        panic!("expected approval");
    };
    h.backdate_approval(approval.id, Utc::now() - Duration::seconds(5)).await;

    let report = h.orchestrator.run_job(JobKind::ExpireOldApprovals).await.unwrap();
    assert_eq!(report.job, JobKind::ExpireOldApprovals);
    assert_eq!(
        h.orchestrator.gate.get(&approval.id).await.unwrap().status,
        ApprovalStatus::Expired
    );

    let health = h.orchestrator.health().await.unwrap();
    assert_eq!(health.pending_approvals, 0);
}
