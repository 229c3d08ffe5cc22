//! CLI command definitions for the `leadflow` binary.

pub mod approval;
pub mod event;
pub mod execution;
pub mod job;
pub mod serve;
pub mod status;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use leadflow_core::jobs::JobKind;

/// Webhook-driven automation orchestrator for lead-generation workflows.
#[derive(Parser)]
#[command(name = "leadflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as newline-delimited JSON.
    #[arg(long, global = true, env = "LEADFLOW_LOG_JSON")]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "LEADFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server and the maintenance scheduler.
    Serve {
        /// Bind address (defaults to [server].host).
        #[arg(long)]
        host: Option<String>,

        /// Port (defaults to [server].port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve HTTP only; leave maintenance jobs to `leadflow worker`.
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Run the maintenance scheduler without the HTTP server.
    Worker,

    /// Show queue, approval and execution health.
    Status,

    /// Run one maintenance job now.
    #[command(name = "run-job")]
    RunJob {
        /// process-queue-batch, retry-failed-webhooks, expire-old-approvals,
        /// cleanup-old-events, sync-registry or poll-running-executions.
        job: JobKind,
    },

    /// Workflow definitions.
    #[command(alias = "wf")]
    Workflows {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Approval requests.
    Approvals {
        #[command(subcommand)]
        action: approval::ApprovalCommand,
    },

    /// Workflow executions.
    Executions {
        #[command(subcommand)]
        action: execution::ExecutionCommand,
    },

    /// Monitoring events.
    Events {
        #[command(subcommand)]
        action: event::EventCommand,
    },

    /// Management API keys.
    #[command(name = "api-key")]
    ApiKey {
        #[command(subcommand)]
        action: ApiKeyCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ApiKeyCommand {
    /// Create a new key. The plaintext is printed once.
    Create {
        #[arg(long, default_value = "cli")]
        name: String,
    },
}

/// Filter directive for the tracing subscriber when `RUST_LOG` is unset.
pub fn log_directive(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn,leadflow_api=info,leadflow_core=info,leadflow_infra=info",
        1 => "info,leadflow_api=debug,leadflow_core=debug,leadflow_infra=debug",
        _ => "trace",
    }
}

/// Table with the house style: condensed UTF-8 borders, cyan first header.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    let cells: Vec<Cell> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                Cell::new(*h).fg(Color::Cyan)
            } else {
                Cell::new(*h)
            }
        })
        .collect();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(cells);
    table
}

/// First eight characters of an id, enough to tell rows apart.
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
