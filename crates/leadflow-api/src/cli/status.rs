//! System status dashboard command.

use anyhow::Result;
use console::style;
use leadflow_core::jobs::JobKind;
use leadflow_core::scheduler::normalize_schedule;

use crate::state::AppState;

/// Queue, approval and execution counts over the monitoring error window,
/// plus the configured job schedules.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let window = chrono::Duration::minutes(state.config.monitoring.error_window_minutes);
    let health = state.orchestrator.health().await?;
    let summary = state.orchestrator.dashboard(window).await?;

    let schedules: Vec<(JobKind, String, Option<String>)> = JobKind::ALL
        .into_iter()
        .map(|job| {
            let raw = state.config.scheduler.schedule_for(job.as_str()).to_string();
            let cron = normalize_schedule(&raw).ok();
            (job, raw, cron)
        })
        .collect();

    if json {
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "engine": state.config.engine.base_url,
            "health": health,
            "dashboard": summary,
            "schedules": schedules
                .iter()
                .map(|(job, raw, cron)| serde_json::json!({ "job": job, "schedule": raw, "cron": cron }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} Leadflow v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Queue ──").dim());
    println!("  Depth:     {}", style(health.queue_depth).bold());
    for (status, n) in &summary.queue_by_status {
        println!("  {status:<10} {n}");
    }
    println!();

    println!("  {}", style("── Approvals ──").dim());
    let pending = if health.pending_approvals > 0 {
        style(health.pending_approvals).yellow()
    } else {
        style(health.pending_approvals).green()
    };
    println!("  Pending:   {pending}");
    println!();

    println!("  {}", style("── Executions ──").dim());
    for (status, n) in &summary.executions_by_status {
        println!("  {status:<10} {n}");
    }
    println!("  In flight: {}", health.in_flight_starts);
    println!();

    println!(
        "  {}",
        style(format!(
            "── Events (last {} min) ──",
            state.config.monitoring.error_window_minutes
        ))
        .dim()
    );
    println!("  Total:      {}", summary.total_events);
    let rate = format!("{:.1}%", summary.error_rate * 100.0);
    if summary.error_rate > 0.05 {
        println!("  Error rate: {}", style(rate).red());
    } else {
        println!("  Error rate: {rate}");
    }
    for event in summary.recent_errors.iter().take(5) {
        println!(
            "  {} {}",
            style(event.created_at.format("%H:%M:%S")).dim(),
            event.event_type
        );
    }
    println!();

    println!("  {}", style("── Schedules ──").dim());
    for (job, raw, cron) in &schedules {
        let shown = match cron {
            _ if raw.trim().is_empty() => "disabled".to_string(),
            Some(cron) => format!("{raw} ({cron})"),
            None => style(format!("{raw} (invalid)")).red().to_string(),
        };
        println!("  {:<24} {shown}", job.as_str());
    }
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Engine:   {}", style(&state.config.engine.base_url).dim());
    println!();

    Ok(())
}
