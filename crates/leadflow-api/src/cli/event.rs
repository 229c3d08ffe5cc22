//! `leadflow events` subcommands.

use anyhow::{Result, bail};
use chrono::{Duration, Utc};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use leadflow_types::monitoring::{MonitoringEvent, Severity};

use crate::cli::{new_table, print_json, short_id};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum EventCommand {
    /// Error and critical events, newest first.
    Errors {
        /// Look back this many minutes.
        #[arg(long, default_value = "60")]
        since_minutes: i64,

        #[arg(long, default_value = "50")]
        limit: u32,
    },
}

pub async fn handle_event_command(cmd: EventCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        EventCommand::Errors {
            since_minutes,
            limit,
        } => errors(state, since_minutes, limit, json).await,
    }
}

async fn errors(state: &AppState, since_minutes: i64, limit: u32, json: bool) -> Result<()> {
    if since_minutes <= 0 {
        bail!("--since-minutes must be positive");
    }
    let since = Utc::now() - Duration::minutes(since_minutes);
    let events = state.orchestrator.monitor.errors(since, limit).await?;
    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!();
        println!("  No errors in the last {since_minutes} minutes.");
        println!();
        return Ok(());
    }

    let mut table = new_table(&["Time", "Severity", "Event", "Execution", "Detail"]);
    for event in &events {
        table.add_row(vec![
            Cell::new(event.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            severity_cell(event.severity),
            Cell::new(event.event_type.as_str()),
            Cell::new(
                event
                    .refs
                    .execution_id
                    .as_ref()
                    .map(short_id)
                    .unwrap_or_default(),
            ),
            Cell::new(detail(event)),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// The payload's `error` or `reason` field, else the compact payload.
fn detail(event: &MonitoringEvent) -> String {
    ["error", "reason"]
        .iter()
        .find_map(|k| event.payload.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| event.payload.to_string())
}

fn severity_cell(severity: Severity) -> Cell {
    let cell = Cell::new(severity.as_str());
    match severity {
        Severity::Critical => cell.fg(Color::Magenta),
        Severity::Error => cell.fg(Color::Red),
        Severity::Warning => cell.fg(Color::Yellow),
        Severity::Info => cell,
    }
}
