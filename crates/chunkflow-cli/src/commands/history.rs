use std::path::Path;

use anyhow::{bail, Context, Result};

use chunkflow_engine::config::parser;
use chunkflow_state::{SqliteStateBackend, StateBackend};
use chunkflow_types::JobName;

/// Execute the `history` command: list recent runs of a job.
pub fn execute(job_path: &Path, limit: u32) -> Result<()> {
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;

    let Some(state) = &config.state else {
        bail!("Job '{}' has no state database; run history is not recorded", config.job);
    };

    let backend = SqliteStateBackend::open(&state.path)
        .with_context(|| format!("Failed to open state database {}", state.path.display()))?;

    let runs = backend
        .recent_runs(&JobName::new(config.job.as_str()), limit)
        .context("Failed to read run history")?;

    if runs.is_empty() {
        println!("No recorded runs for job '{}'.", config.job);
        return Ok(());
    }

    println!("Recent runs of '{}':", config.job);
    for run in &runs {
        let error = run
            .summary
            .error_message
            .as_deref()
            .map(|msg| format!(" error: {msg}"))
            .unwrap_or_default();
        println!(
            "  #{} {} started={} read={} written={} skipped={}{}",
            run.run_id,
            run.status,
            run.started_at,
            run.summary.items_read,
            run.summary.items_written,
            run.summary.items_skipped,
            error
        );
    }
    Ok(())
}
