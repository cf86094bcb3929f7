use std::path::Path;

use anyhow::{Context, Result};

use chunkflow_engine::config::{parser, validator};

/// Execute the `validate` command: parse and validate without running.
pub fn execute(job_path: &Path) -> Result<()> {
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;

    validator::validate_job(&config)?;

    println!("Job '{}' is valid.", config.job);
    for step in &config.steps {
        println!(
            "  [{}] {} -> {} (chunk_size={}, transforms={}, retry={}, skip_limit={})",
            step.name,
            step.source.path.display(),
            step.sink.path.display(),
            step.chunk_size,
            step.transforms.len(),
            step.retry.max_attempts,
            step.skip.limit
        );
    }
    Ok(())
}
