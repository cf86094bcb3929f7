//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for step checkpoints and
//! job run history. Model types live in `chunkflow_types`.

use chunkflow_types::{ExecutionStatus, JobName, RunSummary, StepCheckpoint, StepName};

use crate::error;

/// One row of job run history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: i64,
    pub job: JobName,
    pub status: ExecutionStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub summary: RunSummary,
}

/// Storage contract for batch execution state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Read the persisted checkpoint for a (job, step) pair.
    ///
    /// Returns `Ok(None)` when no checkpoint has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_checkpoint(
        &self,
        job: &JobName,
        step: &StepName,
    ) -> error::Result<Option<StepCheckpoint>>;

    /// Upsert the checkpoint for a (job, step) pair.
    ///
    /// Called by the chunk driver once per committed chunk boundary.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_checkpoint(
        &self,
        job: &JobName,
        step: &StepName,
        checkpoint: &StepCheckpoint,
    ) -> error::Result<()>;

    /// Remove the checkpoint for a (job, step) pair.
    ///
    /// Called when a step completes so a later run starts from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn clear_checkpoint(&self, job: &JobName, step: &StepName) -> error::Result<()>;

    /// Record the start of a job run. Returns the run id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, job: &JobName) -> error::Result<i64>;

    /// Record the terminal status and aggregate counts of a job run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(
        &self,
        run_id: i64,
        status: ExecutionStatus,
        summary: &RunSummary,
    ) -> error::Result<()>;

    /// Most recent runs for a job, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn recent_runs(&self, job: &JobName, limit: u32) -> error::Result<Vec<RunRecord>>;
}
