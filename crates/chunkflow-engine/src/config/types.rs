//! Serde types for the job YAML schema.

use std::path::PathBuf;

use chunkflow_types::ErrorKind;
use serde::{Deserialize, Serialize};

fn default_chunk_size() -> usize {
    10
}

fn default_delimiter() -> char {
    ','
}

fn default_max_attempts() -> u32 {
    1
}

/// Top-level job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub version: String,
    pub job: String,
    /// Optional state database; omit to run without checkpoints or history.
    #[serde(default)]
    pub state: Option<StateConfig>,
    pub steps: Vec<StepConfig>,
}

/// Where execution state is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    pub path: PathBuf,
}

/// One chunk-processing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub skip: SkipConfig,
}

/// Delimited flat-file source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Header lines to skip before the first item.
    #[serde(default)]
    pub skip_lines: usize,
    /// Field names, in column order.
    pub fields: Vec<String>,
}

/// JSON-lines sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub path: PathBuf,
}

/// Built-in transform stages available from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformConfig {
    /// Fail items whose named field is missing or empty.
    RequireField { require_field: String },
    /// Drop (or reject) items whose keyed field value was already seen.
    DedupBy {
        dedup_by: String,
        #[serde(default)]
        filter_duplicates: bool,
    },
}

/// Retry bounds for the transform chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub retry_on: Vec<ErrorKind>,
    #[serde(default)]
    pub backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_on: Vec::new(),
            backoff: false,
        }
    }
}

/// Skip bounds for failed items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipConfig {
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub skip_on: Vec<ErrorKind>,
}
