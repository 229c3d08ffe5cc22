//! `leadflow run-job`: run one maintenance job on demand.

use anyhow::Result;
use console::style;
use leadflow_core::jobs::JobKind;

use crate::cli::print_json;
use crate::state::AppState;

pub async fn run_job(state: &AppState, job: JobKind, json: bool) -> Result<()> {
    let report = state.orchestrator.run_job(job).await?;
    if json {
        return print_json(&report);
    }

    println!();
    println!(
        "  {} {} in {} ms",
        style("Ran").green().bold(),
        style(job).cyan(),
        report.duration_ms
    );
    if let Some(fields) = report.detail.as_object() {
        for (key, value) in fields {
            let value = match value {
                serde_json::Value::Array(items) => items.len().to_string(),
                other => other.to_string(),
            };
            println!("  {key:<14} {value}");
        }
    }
    println!();
    Ok(())
}
