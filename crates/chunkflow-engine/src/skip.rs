//! Skip policy: bounded discarding of failing items.
//!
//! The decision function is pure; the chunk driver owns the running skip
//! count and increments it when a decision comes back [`SkipDecision::Skip`].

use chunkflow_types::ErrorKind;

/// Outcome of consulting the skip policy for one failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    /// Drop the item and continue the step.
    Skip,
    /// Abort the step, propagating the error.
    Fail,
}

/// Declares which error kinds may be skipped and how many times.
///
/// Invariant: the skip count never exceeds `skip_limit`; the error that
/// would push it past the limit fails the step instead.
#[derive(Debug, Clone, Default)]
pub struct SkipPolicy {
    skippable: Vec<ErrorKind>,
    skip_limit: u64,
}

impl SkipPolicy {
    /// Policy skipping the given kinds up to `skip_limit` times per step.
    #[must_use]
    pub fn new(skippable: impl Into<Vec<ErrorKind>>, skip_limit: u64) -> Self {
        Self {
            skippable: skippable.into(),
            skip_limit,
        }
    }

    /// Policy that never skips.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// The configured skip limit.
    #[must_use]
    pub fn skip_limit(&self) -> u64 {
        self.skip_limit
    }

    /// Decide whether a failed item is skipped or fails the step.
    ///
    /// Deterministic and side-effect free: Skip iff `kind` is declared
    /// skippable and `current_count` is still below the limit.
    #[must_use]
    pub fn decide(&self, kind: ErrorKind, current_count: u64) -> SkipDecision {
        if self.skippable.contains(&kind) && current_count < self.skip_limit {
            SkipDecision::Skip
        } else {
            SkipDecision::Fail
        }
    }
}
