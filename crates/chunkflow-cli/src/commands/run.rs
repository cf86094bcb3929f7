use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use chunkflow_engine::config::types::{JobConfig, StepConfig, TransformConfig};
use chunkflow_engine::config::{parser, validator};
use chunkflow_engine::{
    DedupTransform, ExecutionReport, Job, JobReport, RetryPolicy, SkipPolicy, StepBuilder,
    TransformChain, ValidatingTransform,
};
use chunkflow_state::{SqliteStateBackend, StateBackend};
use chunkflow_types::{BatchError, ExecutionStatus, JobName, StepName};

use crate::io::{DelimitedFileSource, JsonLinesSink};
use crate::record::Record;

/// Execute the `run` command: parse, validate, and run a job.
pub fn execute(job_path: &Path) -> Result<()> {
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;

    validator::validate_job(&config)?;

    tracing::info!(
        job = config.job,
        steps = config.steps.len(),
        stateful = config.state.is_some(),
        "Job validated"
    );

    let backend = open_backend(&config)?;
    let mut job = build_job(&config, backend);

    let report = job.run().context("Job run failed")?;
    print_report(&report);

    if report.status != ExecutionStatus::Completed {
        bail!("Job '{}' finished with status {}", report.job, report.status);
    }
    Ok(())
}

fn open_backend(config: &JobConfig) -> Result<Option<Arc<dyn StateBackend>>> {
    let Some(state) = &config.state else {
        return Ok(None);
    };
    let backend = SqliteStateBackend::open(&state.path)
        .with_context(|| format!("Failed to open state database {}", state.path.display()))?;
    Ok(Some(Arc::new(backend)))
}

fn build_job(config: &JobConfig, backend: Option<Arc<dyn StateBackend>>) -> Job {
    let mut job = Job::new(config.job.as_str());
    if let Some(backend) = &backend {
        job = job.state_backend(Arc::clone(backend));
    }

    for step_config in &config.steps {
        let step_name = StepName::new(step_config.name.as_str());
        let job_name = config.job.clone();
        let step_config = step_config.clone();
        let step_backend = backend.clone();
        job = job.step(step_name, move || {
            run_step(&job_name, &step_config, step_backend.clone())
        });
    }
    job
}

/// Build and execute one configured step against its files.
fn run_step(
    job: &str,
    config: &StepConfig,
    backend: Option<Arc<dyn StateBackend>>,
) -> Result<ExecutionReport, BatchError> {
    let mut builder = StepBuilder::new(job, config.name.as_str())
        .chunk_size(config.chunk_size)
        .transform_chain(build_chain(config))
        .skip_policy(SkipPolicy::new(config.skip.skip_on.clone(), config.skip.limit));

    let mut policy = RetryPolicy::new(config.retry.max_attempts, config.retry.retry_on.clone());
    if config.retry.backoff {
        policy = policy.with_backoff();
    }
    builder = builder.retry_policy(policy);

    // Resumed runs append to the sink instead of truncating it.
    let mut resuming = false;
    if let Some(backend) = &backend {
        resuming = backend
            .get_checkpoint(&JobName::new(job), &StepName::new(config.name.as_str()))
            .map_err(|err| BatchError::internal("STATE_BACKEND", err.to_string()))?
            .is_some();
        builder = builder.state_backend(Arc::clone(backend));
    }

    let mut step = builder.build()?;
    let mut source = DelimitedFileSource::open(
        &config.source.path,
        config.source.delimiter,
        config.source.skip_lines,
        config.source.fields.clone(),
    )?;
    let mut sink = if resuming {
        JsonLinesSink::append(&config.sink.path)?
    } else {
        JsonLinesSink::create(&config.sink.path)?
    };

    step.execute(&mut source, &mut sink)
}

/// Translate configured transforms into engine stages, in declared order.
fn build_chain(config: &StepConfig) -> TransformChain<Record> {
    let mut chain = TransformChain::new();
    for transform in &config.transforms {
        match transform {
            TransformConfig::RequireField { require_field } => {
                let field = require_field.clone();
                chain.push(Box::new(ValidatingTransform::new(
                    move |record: &Record| record.has_value(&field),
                    "MISSING_FIELD",
                    format!("field '{require_field}' is missing or empty"),
                )));
            }
            TransformConfig::DedupBy {
                dedup_by,
                filter_duplicates,
            } => {
                let field = dedup_by.clone();
                chain.push(Box::new(DedupTransform::new(
                    move |record: &Record| record.get(&field).unwrap_or_default().to_string(),
                    *filter_duplicates,
                )));
            }
        }
    }
    chain
}

fn print_report(report: &JobReport) {
    let summary = report.summary();
    println!("Job '{}' finished: {}", report.job, report.status);
    println!("  Steps run:      {}", report.steps.len());
    println!("  Items read:     {}", summary.items_read);
    println!("  Items written:  {}", summary.items_written);
    println!("  Items skipped:  {}", summary.items_skipped);
    for step in &report.steps {
        println!(
            "  [{}] {} read={} written={} skipped={} chunks={}",
            step.step,
            step.status(),
            step.state.items_read,
            step.state.items_written,
            step.state.items_skipped,
            step.state.chunks_committed
        );
    }
    if let Some(error) = &summary.error_message {
        println!("  Error:          {error}");
    }
}
