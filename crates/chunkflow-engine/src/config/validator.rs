//! Semantic validation for parsed job configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::{JobConfig, StepConfig, TransformConfig};

/// Validate transform references against the step's declared fields.
fn validate_transforms(step: &StepConfig, context: &str, errors: &mut Vec<String>) {
    let fields: HashSet<&str> = step.source.fields.iter().map(String::as_str).collect();

    for (i, transform) in step.transforms.iter().enumerate() {
        let referenced = match transform {
            TransformConfig::RequireField { require_field } => require_field,
            TransformConfig::DedupBy { dedup_by, .. } => dedup_by,
        };
        if !fields.contains(referenced.as_str()) {
            errors.push(format!(
                "{context}: transforms[{i}] references undeclared field '{referenced}'"
            ));
        }
    }
}

fn validate_step(step: &StepConfig, context: &str, errors: &mut Vec<String>) {
    if step.name.trim().is_empty() {
        errors.push(format!("{context}: step name must not be empty"));
    }

    if step.chunk_size < 1 {
        errors.push(format!("{context}: chunk_size must be at least 1"));
    }

    if step.retry.max_attempts < 1 {
        errors.push(format!("{context}: retry.max_attempts must be at least 1"));
    }

    if step.source.path.as_os_str().is_empty() {
        errors.push(format!("{context}: source.path must not be empty"));
    }

    if step.source.fields.is_empty() {
        errors.push(format!("{context}: source must declare at least one field"));
    }

    if step.sink.path.as_os_str().is_empty() {
        errors.push(format!("{context}: sink.path must not be empty"));
    }

    validate_transforms(step, context, errors);
}

/// Validate a parsed job configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the job config.
pub fn validate_job(config: &JobConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported job version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.job.trim().is_empty() {
        errors.push("Job name must not be empty".to_string());
    }

    if config.steps.is_empty() {
        errors.push("Job must define at least one step".to_string());
    }

    let mut seen_names = HashSet::new();
    for (i, step) in config.steps.iter().enumerate() {
        if !step.name.trim().is_empty() && !seen_names.insert(step.name.as_str()) {
            errors.push(format!("Duplicate step name '{}'", step.name));
        }
        validate_step(step, &format!("steps[{i}]"), &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Job validation failed:\n  - {}", errors.join("\n  - "));
    }
}
