//! Step execution progress record and checkpoint.
//!
//! [`ExecutionState`] is owned exclusively by the chunk driver and mutated
//! once per chunk boundary, never per item. That keeps checkpoint
//! granularity at chunk level: anything not yet folded in was part of an
//! uncommitted chunk and will be re-read on restart.

use serde::{Deserialize, Serialize};

use crate::state::ExecutionStatus;

/// Mutable progress record for one step execution.
///
/// Invariant: `items_read >= items_written + items_skipped` at every
/// observation point. Status transitions are monotonic: `Completed` and
/// `Failed` are never left once entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub items_read: u64,
    pub items_written: u64,
    pub items_skipped: u64,
    pub chunks_committed: u64,
    pub status: ExecutionStatus,
}

impl ExecutionState {
    /// Fresh state for a new step execution.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items_read: 0,
            items_written: 0,
            items_skipped: 0,
            chunks_committed: 0,
            status: ExecutionStatus::Running,
        }
    }

    /// Resume state from a persisted checkpoint.
    #[must_use]
    pub fn from_checkpoint(checkpoint: &StepCheckpoint) -> Self {
        Self {
            items_read: checkpoint.items_read,
            items_written: checkpoint.items_written,
            items_skipped: checkpoint.items_skipped,
            chunks_committed: checkpoint.chunks_committed,
            status: ExecutionStatus::Running,
        }
    }

    /// Fold one committed chunk boundary into the state.
    ///
    /// `read` counts every item pulled for this boundary, including filtered
    /// and skipped ones; `written` is the committed chunk length (0 when the
    /// boundary carried only filtered/skipped trailing items).
    pub fn apply_chunk(&mut self, read: u64, written: u64, skipped: u64) {
        debug_assert!(read >= written + skipped);
        self.items_read += read;
        self.items_written += written;
        self.items_skipped += skipped;
        if written > 0 {
            self.chunks_committed += 1;
        }
    }

    /// Transition to a terminal or stopped status.
    ///
    /// A no-op when the current status is already terminal.
    pub fn finish(&mut self, status: ExecutionStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    /// Whether the read/write/skip accounting invariant holds.
    #[must_use]
    pub fn invariant_holds(&self) -> bool {
        self.items_read >= self.items_written + self.items_skipped
    }

    /// Snapshot the committed counters for persistence.
    #[must_use]
    pub fn checkpoint(&self, updated_at: impl Into<String>) -> StepCheckpoint {
        StepCheckpoint {
            items_read: self.items_read,
            items_written: self.items_written,
            items_skipped: self.items_skipped,
            chunks_committed: self.chunks_committed,
            updated_at: updated_at.into(),
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Persisted read/write offset for a (job, step) pair.
///
/// `items_read` is the resume point: a restarted step fast-forwards its
/// source by this many items, so committed items are never re-processed.
/// `updated_at` is an ISO-8601 UTC string; backends handle formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCheckpoint {
    pub items_read: u64,
    pub items_written: u64,
    pub items_skipped: u64,
    pub chunks_committed: u64,
    pub updated_at: String,
}
