//! Approval gate types.
//!
//! An `ApprovalRequest` holds a `pending` execution until a human, the
//! auto-approver, or the expiry sweep resolves it. Every status change is a
//! compare-and-set out of `pending`; terminal requests never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Highest escalation level an approval can reach.
pub const MAX_ESCALATION_LEVEL: u8 = 5;

/// Actor recorded on decisions made by the auto-approver.
pub const AUTO_APPROVER_ACTOR: &str = "system:auto-approver";

/// Actor recorded on expirations.
pub const EXPIRY_ACTOR: &str = "system:expiry-sweep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 4] = [
        ApprovalStatus::Pending,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
        ApprovalStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApprovalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("invalid approval status: '{s}'"))
    }
}

/// Reviewer urgency. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPriority {
    Low,
    Medium,
    High,
}

impl ApprovalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalPriority::Low => "low",
            ApprovalPriority::Medium => "medium",
            ApprovalPriority::High => "high",
        }
    }

    /// The next tier up. `High` stays `High`.
    pub fn raised(&self) -> ApprovalPriority {
        match self {
            ApprovalPriority::Low => ApprovalPriority::Medium,
            ApprovalPriority::Medium | ApprovalPriority::High => ApprovalPriority::High,
        }
    }
}

impl Default for ApprovalPriority {
    fn default() -> Self {
        ApprovalPriority::Medium
    }
}

impl fmt::Display for ApprovalPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(ApprovalPriority::Low),
            "medium" => Ok(ApprovalPriority::Medium),
            "high" => Ok(ApprovalPriority::High),
            other => Err(format!("invalid approval priority: '{other}'")),
        }
    }
}

/// The kind of sensitive action being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    BulkSend,
    Deployment,
    PaidGeneration,
    General,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::BulkSend => "bulk_send",
            ApprovalType::Deployment => "deployment",
            ApprovalType::PaidGeneration => "paid_generation",
            ApprovalType::General => "general",
        }
    }
}

impl Default for ApprovalType {
    fn default() -> Self {
        ApprovalType::General
    }
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bulk_send" => Ok(ApprovalType::BulkSend),
            "deployment" | "deploy" => Ok(ApprovalType::Deployment),
            "paid_generation" => Ok(ApprovalType::PaidGeneration),
            "general" => Ok(ApprovalType::General),
            other => Err(format!("invalid approval type: '{other}'")),
        }
    }
}

/// A gate on one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub approval_type: ApprovalType,
    pub status: ApprovalStatus,
    pub priority: ApprovalPriority,
    /// Confidence 0-100 from the auto-approver, once evaluated.
    pub auto_approval_confidence: Option<f64>,
    /// 0 to `MAX_ESCALATION_LEVEL`.
    pub escalation_level: u8,
    /// Snapshot of the execution input shown to reviewers.
    pub context: serde_json::Value,
    pub decided_by: Option<String>,
    pub decision_reason: Option<String>,
    pub auto_approved: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && self.expires_at <= now
    }
}

/// A terminal decision applied through compare-and-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub status: ApprovalStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub auto_approved: bool,
    pub decided_at: DateTime<Utc>,
}

/// Filter for approval list queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    pub workflow_id: Option<Uuid>,
    pub priority: Option<ApprovalPriority>,
    pub limit: Option<u32>,
}

/// The business signals that feed the confidence scorer.
///
/// This is the one boundary where lead-specific data crosses into the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringInput {
    /// Caller-supplied quality or trust score, nominally 0-100.
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

impl ScoringInput {
    /// Read scoring input from an execution's `approval_context` object.
    ///
    /// Missing or malformed context yields `None`; the request then waits
    /// for a human.
    pub fn from_execution_input(input: &serde_json::Value) -> Option<Self> {
        let ctx = input.get("approval_context")?;
        serde_json::from_value(ctx.clone()).ok()
    }
}
