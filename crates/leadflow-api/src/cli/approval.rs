//! `leadflow approvals` subcommands.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use leadflow_core::approval::gate::{DecisionOutcome, EscalationOutcome};
use leadflow_core::approval::reviewer_tier;
use leadflow_types::approval::{ApprovalFilter, ApprovalPriority, ApprovalRequest, ApprovalStatus};
use uuid::Uuid;

use crate::cli::{new_table, print_json, short_id};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ApprovalCommand {
    /// List approval requests (pending by default).
    List {
        /// pending, approved, rejected, expired or all.
        #[arg(long, default_value = "pending")]
        status: String,

        /// Only this workflow.
        #[arg(long)]
        workflow: Option<Uuid>,

        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Approve a pending request and resume its execution.
    Approve {
        id: Uuid,

        /// Reviewer recorded on the decision.
        #[arg(long, env = "LEADFLOW_ACTOR")]
        actor: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Reject a pending request and fail its execution.
    Reject {
        id: Uuid,

        #[arg(long, env = "LEADFLOW_ACTOR")]
        actor: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Raise a pending request to the next reviewer tier.
    Escalate { id: Uuid },
}

pub async fn handle_approval_command(
    cmd: ApprovalCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ApprovalCommand::List {
            status,
            workflow,
            limit,
        } => list(state, &status, workflow, limit, json).await,
        ApprovalCommand::Approve { id, actor, reason } => {
            decide(state, id, true, &actor, reason, json).await
        }
        ApprovalCommand::Reject { id, actor, reason } => {
            decide(state, id, false, &actor, reason, json).await
        }
        ApprovalCommand::Escalate { id } => escalate(state, id, json).await,
    }
}

async fn list(
    state: &AppState,
    status: &str,
    workflow: Option<Uuid>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let status = match status {
        "all" => None,
        other => Some(other.parse::<ApprovalStatus>().map_err(anyhow::Error::msg)?),
    };
    let approvals = state
        .orchestrator
        .gate
        .list(&ApprovalFilter {
            status,
            workflow_id: workflow,
            priority: None,
            limit: Some(limit),
        })
        .await?;

    if json {
        return print_json(&approvals);
    }
    if approvals.is_empty() {
        println!();
        println!("  No approval requests.");
        println!();
        return Ok(());
    }

    let mut table = new_table(&[
        "ID", "Type", "Priority", "Status", "Level", "Confidence", "Expires",
    ]);
    for a in &approvals {
        table.add_row(vec![
            Cell::new(short_id(&a.id)),
            Cell::new(a.approval_type.as_str()),
            priority_cell(a.priority),
            status_cell(a.status),
            Cell::new(format!("{} ({})", a.escalation_level, reviewer_tier(a.escalation_level))),
            Cell::new(
                a.auto_approval_confidence
                    .map(|c| format!("{c:.1}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(a.expires_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn decide(
    state: &AppState,
    id: Uuid,
    approved: bool,
    actor: &str,
    reason: Option<String>,
    json: bool,
) -> Result<()> {
    if actor.trim().is_empty() {
        bail!("--actor cannot be empty");
    }
    match state
        .orchestrator
        .gate
        .decide(id, approved, actor.trim(), reason)
        .await?
    {
        DecisionOutcome::Applied { approval } => {
            if json {
                return print_json(&approval);
            }
            print_decided(&approval);
            Ok(())
        }
        DecisionOutcome::Conflict { current } => {
            bail!("approval {id} was already resolved ({current})")
        }
    }
}

fn print_decided(approval: &ApprovalRequest) {
    let verb = match approval.status {
        ApprovalStatus::Approved => style("Approved").green().bold(),
        _ => style("Rejected").red().bold(),
    };
    println!();
    println!("  {verb} {}", approval.id);
    println!("  Execution: {}", approval.execution_id);
    if let Some(reason) = &approval.decision_reason {
        println!("  Reason:    {reason}");
    }
    println!();
}

async fn escalate(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let outcome = state.orchestrator.gate.escalate(id).await?;
    if json {
        return print_json(&outcome);
    }
    match outcome {
        EscalationOutcome::Escalated {
            approval,
            reviewer_tier,
        } => {
            println!();
            println!(
                "  {} to level {} ({})",
                style("Escalated").yellow().bold(),
                approval.escalation_level,
                style(reviewer_tier).cyan()
            );
            println!("  Priority: {}", approval.priority);
            println!();
        }
        EscalationOutcome::AtMaxLevel { approval } => {
            println!();
            println!(
                "  Already at the top level ({}).",
                approval.escalation_level
            );
            println!();
        }
        EscalationOutcome::NotPending { current } => {
            bail!("approval {id} is no longer pending ({current})")
        }
    }
    Ok(())
}

fn priority_cell(priority: ApprovalPriority) -> Cell {
    let cell = Cell::new(priority.as_str());
    match priority {
        ApprovalPriority::High => cell.fg(Color::Red),
        ApprovalPriority::Medium => cell.fg(Color::Yellow),
        ApprovalPriority::Low => cell,
    }
}

fn status_cell(status: ApprovalStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ApprovalStatus::Pending => cell.fg(Color::Yellow),
        ApprovalStatus::Approved => cell.fg(Color::Green),
        ApprovalStatus::Rejected | ApprovalStatus::Expired => cell.fg(Color::Red),
    }
}
