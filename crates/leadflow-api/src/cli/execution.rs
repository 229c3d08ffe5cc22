//! `leadflow executions` subcommands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use leadflow_types::workflow::{ExecutionFilter, ExecutionStatus};
use uuid::Uuid;

use crate::cli::{new_table, print_json, short_id};
use crate::http::handlers::execution::TriggeredExecution;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// List recent executions, newest first.
    List {
        #[arg(long)]
        workflow: Option<Uuid>,

        /// pending, running, completed, failed or cancelled.
        #[arg(long)]
        status: Option<ExecutionStatus>,

        #[arg(long, default_value = "25")]
        limit: u32,
    },

    /// Start a fresh attempt of a failed execution.
    Retry { id: Uuid },

    /// Cancel a pending or running execution.
    Cancel {
        id: Uuid,

        #[arg(long, env = "LEADFLOW_ACTOR", default_value = "cli")]
        actor: String,
    },
}

pub async fn handle_execution_command(
    cmd: ExecutionCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ExecutionCommand::List {
            workflow,
            status,
            limit,
        } => {
            let filter = ExecutionFilter {
                workflow_id: workflow,
                status,
                limit: Some(limit),
            };
            list(state, &filter, json).await
        }
        ExecutionCommand::Retry { id } => retry(state, id, json).await,
        ExecutionCommand::Cancel { id, actor } => cancel(state, id, &actor, json).await,
    }
}

async fn list(state: &AppState, filter: &ExecutionFilter, json: bool) -> Result<()> {
    let executions = state.orchestrator.executor.list(filter).await?;
    if json {
        return print_json(&executions);
    }
    if executions.is_empty() {
        println!();
        println!("  No executions.");
        println!();
        return Ok(());
    }

    let mut table = new_table(&["ID", "Workflow", "Status", "Retry", "Created", "Duration", "Error"]);
    for e in &executions {
        table.add_row(vec![
            Cell::new(short_id(&e.id)),
            Cell::new(&e.workflow_name),
            status_cell(e.status),
            Cell::new(e.retry_count),
            Cell::new(e.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(
                e.duration_ms
                    .map(|ms| format!("{ms} ms"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(e.error_message.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn retry(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let outcome = state.orchestrator.executor.retry(id).await?;
    let view = TriggeredExecution::from(outcome);
    if json {
        return print_json(&view);
    }
    println!();
    println!(
        "  {} retry of {} as {}",
        style("Queued").green().bold(),
        short_id(&id),
        view.execution.id
    );
    println!("  Attempt: {}", view.execution.retry_count);
    if let Some(approval) = &view.approval {
        println!(
            "  Waiting on approval {} ({})",
            style(approval.id).cyan(),
            approval.approval_type
        );
    }
    println!();
    Ok(())
}

async fn cancel(state: &AppState, id: Uuid, actor: &str, json: bool) -> Result<()> {
    let outcome = state.orchestrator.executor.cancel(id, actor).await?;
    if json {
        return print_json(&outcome);
    }
    println!();
    println!("  {} {}", style("Cancelled").yellow().bold(), id);
    if !outcome.engine_notified && outcome.execution.external_execution_id.is_some() {
        println!(
            "  {}",
            style("The engine did not acknowledge the cancel; a late result will be ignored.").dim()
        );
    }
    println!();
    Ok(())
}

fn status_cell(status: ExecutionStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ExecutionStatus::Pending => cell.fg(Color::Yellow),
        ExecutionStatus::Running => cell.fg(Color::Cyan),
        ExecutionStatus::Completed => cell.fg(Color::Green),
        ExecutionStatus::Failed => cell.fg(Color::Red),
        ExecutionStatus::Cancelled => cell.fg(Color::DarkGrey),
    }
}
