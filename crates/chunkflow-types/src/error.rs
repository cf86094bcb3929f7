//! Structured error model for batch operations.
//!
//! [`BatchError`] carries a classification kind plus diagnostic details.
//! Construct via kind-specific factory methods. Whether a given kind is
//! retried or skipped is decided by the policies configured on a step, not
//! by the error itself; the kind is only the classification key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a batch error.
///
/// Retry and skip policies match on this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient item-level failure expected to resolve on retry.
    Transient,
    /// Item failed validation.
    Validation,
    /// Chunk commit failed at the sink. Always fatal to the step.
    SinkCommit,
    /// Invalid engine or step configuration. Fatal at startup.
    Config,
    /// Internal engine error.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Validation => "validation",
            Self::SinkCommit => "sink_commit",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Structured error from a batch operation.
///
/// Carries classification and optional diagnostic details. Construct via
/// kind-specific factory methods (e.g., [`BatchError::validation`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {code}: {message}")]
pub struct BatchError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BatchError {
    fn new(
        kind: ErrorKind,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
            backoff_class,
            details: None,
        }
    }

    /// Transient item-level error (fast backoff).
    #[must_use]
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, BackoffClass::Fast, code, message)
    }

    /// Validation error.
    #[must_use]
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, BackoffClass::Normal, code, message)
    }

    /// Sink commit error.
    #[must_use]
    pub fn sink_commit(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SinkCommit, BackoffClass::Normal, code, message)
    }

    /// Configuration error.
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, BackoffClass::Normal, code, message)
    }

    /// Internal engine error.
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, BackoffClass::Normal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Request a specific delay before the next retry attempt.
    #[must_use]
    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_kinds() {
        assert_eq!(BatchError::transient("T", "t").kind, ErrorKind::Transient);
        assert_eq!(BatchError::validation("V", "v").kind, ErrorKind::Validation);
        assert_eq!(
            BatchError::sink_commit("S", "s").kind,
            ErrorKind::SinkCommit
        );
        assert_eq!(BatchError::config("C", "c").kind, ErrorKind::Config);
        assert_eq!(BatchError::internal("I", "i").kind, ErrorKind::Internal);
    }

    #[test]
    fn transient_defaults_to_fast_backoff() {
        let err = BatchError::transient("TIMEOUT", "timed out");
        assert_eq!(err.backoff_class, BackoffClass::Fast);
        assert!(err.retry_after_ms.is_none());
    }

    #[test]
    fn display_format() {
        let err = BatchError::config("BAD_CHUNK_SIZE", "chunk_size must be at least 1");
        assert_eq!(
            err.to_string(),
            "[config] BAD_CHUNK_SIZE: chunk_size must be at least 1"
        );
    }

    #[test]
    fn serde_roundtrip() {
        let err = BatchError::validation("EMPTY_NAME", "name must not be empty")
            .with_details(serde_json::json!({"field": "name"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: BatchError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn retry_after_is_preserved() {
        let err = BatchError::transient("THROTTLED", "slow down").with_retry_after_ms(250);
        assert_eq!(err.retry_after_ms, Some(250));
    }

    #[test]
    fn kind_display_strings() {
        assert_eq!(ErrorKind::Transient.to_string(), "transient");
        assert_eq!(ErrorKind::SinkCommit.to_string(), "sink_commit");
        assert_eq!(ErrorKind::Config.to_string(), "config");
    }
}
