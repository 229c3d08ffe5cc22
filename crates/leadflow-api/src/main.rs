//! Leadflow CLI and HTTP server entry point.
//!
//! Binary name: `leadflow`
//!
//! Parses CLI arguments, sets up tracing, wires the database and engine
//! client, then dispatches to a command handler or starts the server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use console::style;
use leadflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{ApiKeyCommand, Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        otel: cli.otel,
        json: cli.log_json,
        default_directive: cli::log_directive(cli.verbose, cli.quiet).to_string(),
    })
    .map_err(|e| anyhow::anyhow!("cannot initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "leadflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let result = dispatch(cli, state).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: AppState) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Serve {
            host,
            port,
            no_scheduler,
        } => cli::serve::serve(state, host, port, no_scheduler).await,

        Commands::Worker => cli::serve::worker(state).await,

        Commands::Status => cli::status::status(&state, json).await,

        Commands::RunJob { job } => cli::job::run_job(&state, job, json).await,

        Commands::Workflows { action } => {
            cli::workflow::handle_workflow_command(action, &state, json).await
        }

        Commands::Approvals { action } => {
            cli::approval::handle_approval_command(action, &state, json).await
        }

        Commands::Executions { action } => {
            cli::execution::handle_execution_command(action, &state, json).await
        }

        Commands::Events { action } => cli::event::handle_event_command(action, &state, json).await,

        Commands::ApiKey {
            action: ApiKeyCommand::Create { name },
        } => {
            let key = http::extractors::auth::create_api_key(&state, &name).await?;
            if json {
                return cli::print_json(&serde_json::json!({ "name": name, "key": key }));
            }
            println!();
            println!(
                "  {} API key '{}' created (save this, it won't be shown again):",
                style("🔑").bold(),
                name
            );
            println!();
            println!("  {}", style(&key).yellow().bold());
            println!();
            Ok(())
        }

        Commands::Completions { .. } => unreachable!("handled before state init"),
    }
}
