//! Races between workers, reviewers and sweeps.

mod common;

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{Harness, definition, gated_definition, harness};
use leadflow_core::approval::auto::{AutoDecision, DeferReason};
use leadflow_core::approval::gate::DecisionOutcome;
use leadflow_core::executor::TriggerOutcome;
use leadflow_types::approval::{ApprovalRequest, ApprovalStatus, AUTO_APPROVER_ACTOR};
use leadflow_types::webhook::NewWebhook;
use leadflow_types::workflow::{failure_reason, ExecutionStatus, NewWorkflowDefinition};
use serde_json::json;
use uuid::Uuid;

async fn open_approvals(h: &Harness, workflow_id: Uuid, inputs: Vec<serde_json::Value>) -> Vec<ApprovalRequest> {
    let mut approvals = Vec::new();
    for input in inputs {
        let outcome = h
            .orchestrator
            .executor
            .trigger("campaign.launched", input, None, Some(workflow_id))
            .await
            .unwrap()
            .remove(0);
        match outcome {
            TriggerOutcome::AwaitingApproval { approval, .. } => approvals.push(approval),
            other => panic!("expected approval, got {other:?}"),
        }
    }
    approvals
}

fn confident_lead(n: u32) -> serde_json::Value {
    json!({
        "lead_id": n,
        "approval_context": { "quality_score": 96.0, "verified": true, "risk_flags": [] }
    })
}

#[tokio::test]
async fn concurrent_decisions_have_one_winner() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let approval = open_approvals(&h, def.id, vec![json!({})]).await.remove(0);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let gate = h.orchestrator.gate.clone();
        let approve = i % 2 == 0;
        tasks.push(tokio::spawn(async move {
            gate.decide(approval.id, approve, &format!("reviewer-{i}"), None)
                .await
                .unwrap()
        }));
    }

    let mut applied = Vec::new();
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            DecisionOutcome::Applied { approval } => applied.push(approval),
            DecisionOutcome::Conflict { .. } => conflicts += 1,
        }
    }
    assert_eq!(applied.len(), 1);
    assert_eq!(conflicts, 7);

    let winner = &applied[0];
    let stored = h.orchestrator.gate.get(&approval.id).await.unwrap();
    assert_eq!(stored.status, winner.status);
    assert_eq!(stored.decided_by, winner.decided_by);

    let expected = if winner.status == ApprovalStatus::Approved {
        ExecutionStatus::Running
    } else {
        ExecutionStatus::Failed
    };
    h.wait_for_status(approval.execution_id, expected).await;
    assert!(h.engine.start_calls() <= 1);
}

#[tokio::test]
async fn decision_and_expiry_sweep_race_to_one_outcome() {
    let h = harness().await;
    let def = h.create(gated_definition("bulk-campaign", &["campaign.launched"])).await;
    let approval = open_approvals(&h, def.id, vec![json!({})]).await.remove(0);
    h.backdate_approval(approval.id, Utc::now() - Duration::seconds(1)).await;

    let gate = h.orchestrator.gate.clone();
    let decide = tokio::spawn(async move { gate.decide(approval.id, true, "alice", None).await.unwrap() });
    let gate = h.orchestrator.gate.clone();
    let sweep = tokio::spawn(async move { gate.expire_overdue(10).await.unwrap() });

    let decided = decide.await.unwrap();
    let swept = sweep.await.unwrap();

    let decision_won = matches!(decided, DecisionOutcome::Applied { .. });
    assert_eq!(u32::from(decision_won) + swept.expired, 1);

    let stored = h.orchestrator.gate.get(&approval.id).await.unwrap();
    if decision_won {
        assert_eq!(stored.status, ApprovalStatus::Approved);
        h.wait_for_status(approval.execution_id, ExecutionStatus::Running).await;
    } else {
        assert_eq!(stored.status, ApprovalStatus::Expired);
        let failed = h.execution(approval.execution_id).await;
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some(failure_reason::APPROVAL_EXPIRED));
    }
}

#[tokio::test]
async fn auto_approval_never_exceeds_daily_cap() {
    let h = harness().await;
    let def = h
        .create(NewWorkflowDefinition {
            auto_approval_enabled: true,
            auto_approval_daily_cap: Some(3),
            ..gated_definition("bulk-campaign", &["campaign.launched"])
        })
        .await;
    let approvals = open_approvals(&h, def.id, (0..10).map(confident_lead).collect()).await;

    let mut tasks = Vec::new();
    for approval in &approvals {
        let auto = h.orchestrator.auto.clone();
        let id = approval.id;
        tasks.push(tokio::spawn(async move { auto.evaluate(id).await.unwrap() }));
    }

    let mut approved = 0;
    let mut capped = 0;
    for task in tasks {
        match task.await.unwrap() {
            AutoDecision::Approved { confidence } => {
                assert!(confidence >= 90.0);
                approved += 1;
            }
            AutoDecision::Deferred {
                reason: DeferReason::DailyCapReached,
                confidence,
            } => {
                assert_eq!(confidence, Some(96.0));
                capped += 1;
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }
    assert_eq!(approved, 3);
    assert_eq!(capped, 7);
    assert_eq!(h.orchestrator.auto.approved_today(&def.id).await.unwrap(), 3);

    let mut auto_rows = 0;
    for approval in &approvals {
        let stored = h.orchestrator.gate.get(&approval.id).await.unwrap();
        assert_eq!(stored.auto_approval_confidence, Some(96.0));
        if stored.auto_approved {
            assert_eq!(stored.status, ApprovalStatus::Approved);
            assert_eq!(stored.decided_by.as_deref(), Some(AUTO_APPROVER_ACTOR));
            auto_rows += 1;
        } else {
            assert_eq!(stored.status, ApprovalStatus::Pending);
        }
    }
    assert_eq!(auto_rows, 3);
}

#[tokio::test]
async fn low_confidence_and_missing_context_wait_for_humans() {
    let h = harness().await;
    let def = h
        .create(NewWorkflowDefinition {
            auto_approval_enabled: true,
            ..gated_definition("bulk-campaign", &["campaign.launched"])
        })
        .await;
    let approvals = open_approvals(
        &h,
        def.id,
        vec![
            // 100 * 0.85 = 85, below the 90 threshold.
            json!({"approval_context": {"quality_score": 100.0, "verified": false}}),
            json!({"lead_id": 4}),
        ],
    )
    .await;

    let unverified = h.orchestrator.auto.evaluate(approvals[0].id).await.unwrap();
    match unverified {
        AutoDecision::Deferred {
            confidence: Some(confidence),
            reason: DeferReason::BelowThreshold,
        } => assert!((confidence - 85.0).abs() < 1e-9),
        other => panic!("expected below-threshold deferral, got {other:?}"),
    }
    let no_context = h.orchestrator.auto.evaluate(approvals[1].id).await.unwrap();
    assert_eq!(
        no_context,
        AutoDecision::Deferred {
            confidence: None,
            reason: DeferReason::NoContext
        }
    );

    for approval in &approvals {
        let stored = h.orchestrator.gate.get(&approval.id).await.unwrap();
        assert_eq!(stored.status, ApprovalStatus::Pending);
    }
    assert_eq!(h.engine.start_calls(), 0);
}

#[tokio::test]
async fn concurrent_workers_never_claim_the_same_row() {
    let h = harness().await;
    for n in 0..30 {
        h.orchestrator
            .queue
            .enqueue(NewWebhook {
                idempotency_key: Some(format!("lead-{n}")),
                source: "crm".into(),
                event_type: "lead.created".into(),
                payload: json!({"lead_id": n}),
                target_workflow_id: None,
                priority: (n % 10) as i32,
                max_retries: 3,
            })
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let queue = h.orchestrator.queue.clone();
        tasks.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = queue.claim_batch(4).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|w| w.id));
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "webhook {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 30);
}

#[tokio::test]
async fn cancel_during_slow_start_keeps_execution_cancelled() {
    let h = harness().await;
    let def = h.create(definition("lead-nurture", &["lead.created"])).await;
    h.engine.set_start_delay(StdDuration::from_millis(200));

    let id = h
        .orchestrator
        .executor
        .trigger("lead.created", json!({}), None, Some(def.id))
        .await
        .unwrap()
        .remove(0)
        .execution()
        .id;
    let executor = h.orchestrator.executor.clone();
    let start = tokio::spawn(async move { executor.start(id).await.unwrap() });

    tokio::time::sleep(StdDuration::from_millis(50)).await;
    let cancelled = h.orchestrator.executor.cancel(id, "ops").await.unwrap();
    assert_eq!(cancelled.execution.status, ExecutionStatus::Cancelled);

    let outcome = start.await.unwrap();
    assert_eq!(
        outcome,
        leadflow_core::executor::StartOutcome::Skipped {
            status: ExecutionStatus::Cancelled
        }
    );
    let stored = h.execution(id).await;
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
    assert!(stored.external_execution_id.is_none());
    // The engine accepted the start after the cancel, so it is told to stop.
    assert_eq!(h.engine.cancelled(), vec!["ext-1".to_string()]);
}
