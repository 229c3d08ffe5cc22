//! Long-running modes: `serve` (HTTP plus scheduler) and `worker`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use leadflow_core::scheduler::MaintenanceScheduler;

use crate::http::extractors::auth::ensure_api_key;
use crate::http::router::build_router;
use crate::state::AppState;

pub async fn serve(
    state: AppState,
    host: Option<String>,
    port: Option<u16>,
    no_scheduler: bool,
) -> Result<()> {
    if let Some(api_key) = ensure_api_key(&state).await? {
        println!();
        println!(
            "  {} API key generated (save this, it won't be shown again):",
            style("🔑").bold()
        );
        println!();
        println!("  {}", style(&api_key).yellow().bold());
        println!();
    }

    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    let scheduler = if no_scheduler {
        None
    } else {
        Some(start_scheduler(&state).await?)
    };

    println!(
        "  {} Leadflow listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}")).cyan().underlined()
    );
    println!("  Webhooks: {}", style(format!("http://{addr}/webhooks/generic")).dim());
    println!("  Health:   {}", style(format!("http://{addr}/health")).dim());
    println!();
    tracing::info!(%addr, scheduler = !no_scheduler, "server started");

    let router = build_router(state.clone());
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.stop().await {
            tracing::warn!(error = %e, "scheduler did not stop cleanly");
        }
    }
    state.db_pool.close().await;
    served?;

    println!("\n  Server stopped.");
    Ok(())
}

/// Run the maintenance jobs until interrupted.
pub async fn worker(state: AppState) -> Result<()> {
    let scheduler = start_scheduler(&state).await?;
    let jobs = scheduler.scheduled_jobs().await;

    println!();
    println!("  {} Leadflow worker running {} jobs", style("⚙").bold(), jobs.len());
    for (job, cron) in &jobs {
        println!("  {:<24} {}", job.as_str(), style(cron).dim());
    }
    println!();

    shutdown_signal().await;

    scheduler.stop().await?;
    state.db_pool.close().await;
    println!("\n  Worker stopped.");
    Ok(())
}

async fn start_scheduler(state: &AppState) -> Result<MaintenanceScheduler> {
    let scheduler = MaintenanceScheduler::new();
    scheduler.start().await?;
    scheduler
        .schedule_all(Arc::clone(&state.orchestrator), &state.config.scheduler)
        .await?;
    Ok(scheduler)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}
