//! `leadflow workflows` subcommands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;

use crate::cli::{new_table, print_json};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// List workflow definitions.
    List {
        /// Hide deactivated definitions.
        #[arg(long)]
        active_only: bool,
    },

    /// Reconcile definitions against the engine's workflow list.
    Sync,
}

pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::List { active_only } => list(state, active_only, json).await,
        WorkflowCommand::Sync => sync(state, json).await,
    }
}

async fn list(state: &AppState, active_only: bool, json: bool) -> Result<()> {
    let defs = state.orchestrator.registry.list(active_only).await?;
    if json {
        return print_json(&defs);
    }
    if defs.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!(
            "  Import them from the engine with: {}",
            style("leadflow workflows sync").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = new_table(&["Name", "Events", "Approval", "Active", "Runs", "OK", "Failed"]);
    for d in &defs {
        let approval = if d.requires_approval {
            if d.auto_approval_enabled {
                format!("{} (auto)", d.approval_type)
            } else {
                d.approval_type.to_string()
            }
        } else {
            "-".to_string()
        };
        let active = if d.is_active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&d.name),
            Cell::new(d.trigger_events.join(", ")),
            Cell::new(approval),
            active,
            Cell::new(d.execution_count),
            Cell::new(d.success_count),
            Cell::new(d.failure_count),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn sync(state: &AppState, json: bool) -> Result<()> {
    let engine = state.orchestrator.executor.engine();
    let report = state.orchestrator.registry.sync(engine.as_ref()).await?;
    if json {
        return print_json(&report);
    }

    println!();
    println!("  {}", style("── Registry sync ──").dim());
    println!("  Created:     {}", style(report.created.len()).green());
    for name in &report.created {
        println!("    + {name}");
    }
    println!("  Deactivated: {}", style(report.deactivated.len()).yellow());
    for name in &report.deactivated {
        println!("    - {name}");
    }
    println!("  Unchanged:   {}", report.unchanged);
    println!();
    Ok(())
}
