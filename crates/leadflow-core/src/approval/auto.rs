//! Automatic approval: score a request and approve it when the score is
//! high enough and the workflow's daily allowance is not used up.
//!
//! The scorer is a narrow trait object. Swapping the rule-based scorer for a
//! model-backed one changes nothing in the gate's state machine.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use leadflow_types::approval::{ApprovalStatus, ScoringInput};
use leadflow_types::config::ApprovalConfig;
use leadflow_types::monitoring::{EventRefs, EventType};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::gate::{ApprovalError, ApprovalGate, DecisionOutcome};
use crate::engine::WorkflowEngine;
use crate::monitor::EventMonitor;
use crate::repository::approval::ApprovalRepository;
use crate::repository::monitoring::MonitoringRepository;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Computes a confidence in `[0, 100]` that an approval is safe to skip.
pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, input: &ScoringInput) -> f64;

    /// Name recorded alongside each score.
    fn name(&self) -> &str;
}

/// Default scorer built from the quality score, verification and risk flags.
///
/// - starts at `quality_score` clamped to 0..=100
/// - unverified input is scaled by `unverified_factor`
/// - each risk flag subtracts `flag_penalty`, or `severe_flag_penalty` for
///   flags listed in `severe_flags`
#[derive(Debug, Clone)]
pub struct RuleBasedScorer {
    pub unverified_factor: f64,
    pub flag_penalty: f64,
    pub severe_flag_penalty: f64,
    pub severe_flags: Vec<String>,
}

impl Default for RuleBasedScorer {
    fn default() -> Self {
        Self {
            unverified_factor: 0.85,
            flag_penalty: 15.0,
            severe_flag_penalty: 40.0,
            severe_flags: vec![
                "spam_pattern".to_string(),
                "blocklisted_domain".to_string(),
                "duplicate_burst".to_string(),
            ],
        }
    }
}

impl ConfidenceScorer for RuleBasedScorer {
    fn score(&self, input: &ScoringInput) -> f64 {
        let base = if input.quality_score.is_finite() {
            input.quality_score.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let mut score = if input.verified {
            base
        } else {
            base * self.unverified_factor
        };
        for flag in &input.risk_flags {
            score -= if self.severe_flags.iter().any(|s| s == flag) {
                self.severe_flag_penalty
            } else {
                self.flag_penalty
            };
        }
        score.clamp(0.0, 100.0)
    }

    fn name(&self) -> &str {
        "rule_based"
    }
}

// ---------------------------------------------------------------------------
// AutoApprover
// ---------------------------------------------------------------------------

/// Why a request was left for a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// The workflow does not allow auto-approval.
    Disabled,
    /// The execution input carries no scoring context.
    NoContext,
    BelowThreshold,
    DailyCapReached,
    /// The scorer returned NaN or an infinity.
    InvalidScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AutoDecision {
    Approved { confidence: f64 },
    Deferred {
        confidence: Option<f64>,
        reason: DeferReason,
    },
    /// The request was no longer pending.
    AlreadyResolved { current: ApprovalStatus },
}

pub struct AutoApprover<W, A, M, E>
where
    W: WorkflowRepository,
    A: ApprovalRepository,
    M: MonitoringRepository,
    E: WorkflowEngine,
{
    gate: Arc<ApprovalGate<W, A, M, E>>,
    approvals: Arc<A>,
    workflows: Arc<W>,
    monitor: Arc<EventMonitor<M>>,
    scorer: Arc<dyn ConfidenceScorer>,
    threshold: f64,
    default_daily_cap: u32,
}

impl<W, A, M, E> AutoApprover<W, A, M, E>
where
    W: WorkflowRepository + 'static,
    A: ApprovalRepository + 'static,
    M: MonitoringRepository + 'static,
    E: WorkflowEngine + 'static,
{
    pub fn new(
        gate: Arc<ApprovalGate<W, A, M, E>>,
        approvals: Arc<A>,
        workflows: Arc<W>,
        monitor: Arc<EventMonitor<M>>,
        scorer: Arc<dyn ConfidenceScorer>,
        config: &ApprovalConfig,
    ) -> Self {
        Self {
            gate,
            approvals,
            workflows,
            monitor,
            scorer,
            threshold: config.auto_approve_threshold,
            default_daily_cap: config.auto_approve_daily_cap,
        }
    }

    /// Score a pending request and approve it if allowed.
    ///
    /// The confidence is recorded on the request whenever a score was
    /// computed, approved or not.
    pub async fn evaluate(&self, approval_id: Uuid) -> Result<AutoDecision, ApprovalError> {
        let request = self.gate.get(&approval_id).await?;
        if request.status.is_terminal() {
            return Ok(AutoDecision::AlreadyResolved {
                current: request.status,
            });
        }

        let definition = self.workflows.get_definition(&request.workflow_id).await?;
        if !definition.as_ref().is_some_and(|d| d.auto_approval_enabled) {
            return Ok(AutoDecision::Deferred {
                confidence: None,
                reason: DeferReason::Disabled,
            });
        }
        let cap = definition
            .as_ref()
            .and_then(|d| d.auto_approval_daily_cap)
            .unwrap_or(self.default_daily_cap);

        let Some(input) = ScoringInput::from_execution_input(&request.context) else {
            return self.defer(&request.id, &request, None, DeferReason::NoContext).await;
        };

        let raw = self.scorer.score(&input);
        let Some(confidence) = bounded_confidence(raw) else {
            tracing::warn!(%approval_id, score = raw, scorer = self.scorer.name(), "scorer returned a non-finite score");
            return self.defer(&approval_id, &request, None, DeferReason::InvalidScore).await;
        };
        self.approvals.set_confidence(&approval_id, confidence).await?;

        if !meets_threshold(confidence, self.threshold) {
            return self
                .defer(&approval_id, &request, Some(confidence), DeferReason::BelowThreshold)
                .await;
        }

        match self
            .gate
            .auto_approve(&request, confidence, day_start(Utc::now()), cap)
            .await?
        {
            Some(DecisionOutcome::Applied { .. }) => {
                tracing::info!(%approval_id, confidence, scorer = self.scorer.name(), "auto-approved");
                Ok(AutoDecision::Approved { confidence })
            }
            Some(DecisionOutcome::Conflict { current }) => {
                Ok(AutoDecision::AlreadyResolved { current })
            }
            None => {
                self.defer(&approval_id, &request, Some(confidence), DeferReason::DailyCapReached)
                    .await
            }
        }
    }

    async fn defer(
        &self,
        approval_id: &Uuid,
        request: &leadflow_types::approval::ApprovalRequest,
        confidence: Option<f64>,
        reason: DeferReason,
    ) -> Result<AutoDecision, ApprovalError> {
        tracing::debug!(%approval_id, ?confidence, ?reason, "auto-approval deferred to human");
        self.monitor
            .info(
                EventType::ApprovalAutoDeferred,
                EventRefs::execution(request.workflow_id, request.execution_id)
                    .with_approval(*approval_id),
                json!({
                    "confidence": confidence,
                    "threshold": self.threshold,
                    "reason": reason,
                    "scorer": self.scorer.name(),
                }),
            )
            .await;
        Ok(AutoDecision::Deferred { confidence, reason })
    }

    /// Auto-approvals already granted today (UTC) for `workflow_id`.
    pub async fn approved_today(&self, workflow_id: &Uuid) -> Result<u64, ApprovalError> {
        Ok(self
            .approvals
            .count_auto_approved_since(workflow_id, day_start(Utc::now()))
            .await?)
    }
}

/// A scorer result clamped to `[0, 100]`, or `None` when it is not finite.
fn bounded_confidence(raw: f64) -> Option<f64> {
    raw.is_finite().then(|| raw.clamp(0.0, 100.0))
}

/// False for NaN on either side.
fn meets_threshold(confidence: f64, threshold: f64) -> bool {
    confidence >= threshold
}

/// Midnight UTC of the day containing `now`.
fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&midnight)
}
