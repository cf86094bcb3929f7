//! Job YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::JobConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                missing.push(var_name.to_string());
            }
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result)
}

/// Parse a job configuration from a YAML string.
///
/// # Errors
///
/// Returns an error on missing environment variables or malformed YAML.
pub fn parse_job_str(yaml: &str) -> Result<JobConfig> {
    let substituted = substitute_env_vars(yaml)?;
    serde_yaml::from_str(&substituted).context("Failed to parse job YAML")
}

/// Parse a job configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file can't be read or parsed.
pub fn parse_job(path: &Path) -> Result<JobConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    parse_job_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_JOB: &str = r#"
version: "1.0"
job: save_person
steps:
  - name: load
    chunk_size: 10
    source:
      path: people.csv
      fields: [name, age, address]
    sink:
      path: out.jsonl
"#;

    #[test]
    fn parses_minimal_job() {
        let config = parse_job_str(MINIMAL_JOB).unwrap();
        assert_eq!(config.job, "save_person");
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0].source.fields.len(), 3);
        assert!(config.state.is_none());
    }

    #[test]
    fn substitutes_env_vars() {
        std::env::set_var("CHUNKFLOW_TEST_OUT", "subst.jsonl");
        let yaml = MINIMAL_JOB.replace("out.jsonl", "${CHUNKFLOW_TEST_OUT}");
        let config = parse_job_str(&yaml).unwrap();
        assert_eq!(
            config.steps[0].sink.path.to_str().unwrap(),
            "subst.jsonl"
        );
        std::env::remove_var("CHUNKFLOW_TEST_OUT");
    }

    #[test]
    fn missing_env_var_fails_with_name() {
        let yaml = MINIMAL_JOB.replace("out.jsonl", "${CHUNKFLOW_DEFINITELY_UNSET}");
        let err = parse_job_str(&yaml).unwrap_err().to_string();
        assert!(err.contains("CHUNKFLOW_DEFINITELY_UNSET"), "got: {err}");
    }

    #[test]
    fn malformed_yaml_fails() {
        let err = parse_job_str("version: [").unwrap_err().to_string();
        assert!(err.contains("Failed to parse job YAML"), "got: {err}");
    }

    #[test]
    fn substitute_leaves_plain_text_alone() {
        assert_eq!(substitute_env_vars("no vars here").unwrap(), "no vars here");
    }
}
