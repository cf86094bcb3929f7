//! The chunk driver: orchestrates source, transform chain, and sink.
//!
//! A [`Step`] pulls items from its source, threads each through the
//! retry-wrapped transform chain, accumulates survivors into a chunk of
//! configured size, and commits each full chunk to the sink as one atomic
//! write. [`ExecutionState`] is folded and checkpointed once per chunk
//! boundary, so a restarted step resumes from the last committed read
//! offset and never re-processes committed items.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chunkflow_state::StateBackend;
use chunkflow_types::{
    BatchError, ExecutionState, ExecutionStatus, JobName, StepCheckpoint, StepName,
};

use crate::item::{ItemSink, ItemSource};
use crate::retry::{RetryController, RetryListener, RetryPolicy};
use crate::skip::{SkipDecision, SkipPolicy};
use crate::transform::TransformChain;

/// Cooperative stop signal, observed by the driver between chunks.
///
/// Stopping never interrupts a chunk in flight: the current chunk either
/// commits or rolls back atomically before the step halts.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Fresh, un-triggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the step to stop at the next chunk boundary.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Final report of one step execution.
///
/// A failed step still carries its last consistent counters; `error` is
/// the terminal error for `Failed` status and `None` otherwise.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub step: StepName,
    pub state: ExecutionState,
    pub error: Option<BatchError>,
}

impl ExecutionReport {
    /// Terminal status of the execution.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.state.status
    }

    /// Whether the step ran to completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.status == ExecutionStatus::Completed
    }
}

/// Builder for [`Step`]. Validates configuration at `build()`.
pub struct StepBuilder<T> {
    job: JobName,
    name: StepName,
    chunk_size: usize,
    chain: TransformChain<T>,
    retry_policy: RetryPolicy,
    retry_listeners: Vec<Box<dyn RetryListener>>,
    skip_policy: SkipPolicy,
    state_backend: Option<Arc<dyn StateBackend>>,
    restart_from: Option<StepCheckpoint>,
    stop_token: Option<StopToken>,
}

impl<T> StepBuilder<T> {
    /// Start building a step of `job` named `name`.
    #[must_use]
    pub fn new(job: impl Into<JobName>, name: impl Into<StepName>) -> Self {
        Self {
            job: job.into(),
            name: name.into(),
            chunk_size: 10,
            chain: TransformChain::new(),
            retry_policy: RetryPolicy::none(),
            retry_listeners: Vec::new(),
            skip_policy: SkipPolicy::none(),
            state_backend: None,
            restart_from: None,
            stop_token: None,
        }
    }

    /// Items per committed chunk. Must be at least 1.
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Append a transform stage to the chain.
    #[must_use]
    pub fn transform(mut self, stage: impl crate::item::Transform<T> + 'static) -> Self {
        self.chain = self.chain.stage(stage);
        self
    }

    /// Replace the whole transform chain.
    #[must_use]
    pub fn transform_chain(mut self, chain: TransformChain<T>) -> Self {
        self.chain = chain;
        self
    }

    /// Retry policy wrapping the transform chain.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Attach a retry lifecycle listener.
    #[must_use]
    pub fn retry_listener(mut self, listener: Box<dyn RetryListener>) -> Self {
        self.retry_listeners.push(listener);
        self
    }

    /// Skip policy consulted after retry exhaustion.
    #[must_use]
    pub fn skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.skip_policy = policy;
        self
    }

    /// Persist checkpoints to (and resume from) this backend.
    #[must_use]
    pub fn state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.state_backend = Some(backend);
        self
    }

    /// Resume from an explicit checkpoint, for callers without a backend.
    ///
    /// A checkpoint found in the state backend takes precedence.
    #[must_use]
    pub fn restart_from(mut self, checkpoint: StepCheckpoint) -> Self {
        self.restart_from = Some(checkpoint);
        self
    }

    /// Observe this token for stop requests between chunks.
    #[must_use]
    pub fn stop_token(mut self, token: StopToken) -> Self {
        self.stop_token = Some(token);
        self
    }

    /// Validate the configuration and build the step.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`BatchError`] when `chunk_size` is zero.
    pub fn build(self) -> Result<Step<T>, BatchError> {
        if self.chunk_size < 1 {
            return Err(BatchError::config(
                "BAD_CHUNK_SIZE",
                "chunk_size must be at least 1",
            ));
        }
        let mut retry = RetryController::new(self.retry_policy);
        for listener in self.retry_listeners {
            retry = retry.with_listener(listener);
        }
        Ok(Step {
            job: self.job,
            name: self.name,
            chunk_size: self.chunk_size,
            chain: self.chain,
            retry,
            skip_policy: self.skip_policy,
            state_backend: self.state_backend,
            restart_from: self.restart_from,
            stop_token: self.stop_token,
        })
    }
}

/// One chunk-processing step, reusable across sources and sinks.
///
/// Reentrant by construction: all mutable progress lives in the
/// [`ExecutionState`] owned by each `execute` call.
pub struct Step<T> {
    job: JobName,
    name: StepName,
    chunk_size: usize,
    chain: TransformChain<T>,
    retry: RetryController,
    skip_policy: SkipPolicy,
    state_backend: Option<Arc<dyn StateBackend>>,
    restart_from: Option<StepCheckpoint>,
    stop_token: Option<StopToken>,
}

impl<T> std::fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("job", &self.job)
            .field("name", &self.name)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl<T: Clone> Step<T> {
    /// The step name.
    #[must_use]
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Run the chunk loop from start to completion, failure, or stop.
    ///
    /// A previously persisted checkpoint for this (job, step) pair resumes
    /// the run: the source is fast-forwarded by the checkpointed read
    /// offset before processing begins.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for infrastructure failures (checkpoint reads and
    /// writes); item and commit failures finish the step with status
    /// `Failed` and are reported in the [`ExecutionReport`].
    pub fn execute(
        &mut self,
        source: &mut dyn ItemSource<T>,
        sink: &mut dyn ItemSink<T>,
    ) -> Result<ExecutionReport, BatchError> {
        let mut state = self.initial_state()?;
        let resume_offset = state.items_read;

        tracing::info!(
            job = self.job.as_str(),
            step = self.name.as_str(),
            chunk_size = self.chunk_size,
            resume_offset,
            "Starting step"
        );

        if resume_offset > 0 {
            if let Err(err) = fast_forward(source, resume_offset) {
                return Ok(self.fail(state, err));
            }
        }

        let mut buffer: Vec<T> = Vec::with_capacity(self.chunk_size);
        // Items pulled and items skipped since the last chunk boundary.
        let mut pending_read = 0u64;
        let mut pending_skipped = 0u64;

        loop {
            if buffer.is_empty() && self.stop_requested() {
                state.finish(ExecutionStatus::Stopped);
                tracing::info!(
                    job = self.job.as_str(),
                    step = self.name.as_str(),
                    items_read = state.items_read,
                    items_written = state.items_written,
                    "Stop requested, halting step at chunk boundary"
                );
                return Ok(self.report(state, None));
            }

            let item = match source.next_item() {
                Ok(item) => item,
                Err(err) => return Ok(self.fail(state, err)),
            };

            let Some(item) = item else {
                // Source exhausted: flush the trailing partial chunk through
                // the same transactional path as full chunks.
                if !buffer.is_empty() {
                    match self.commit(sink, &buffer, &mut state, pending_read, pending_skipped) {
                        Ok(()) => {}
                        Err(CommitOutcome::ChunkFailed(err)) => return Ok(self.fail(state, err)),
                        Err(CommitOutcome::Infrastructure(err)) => return Err(err),
                    }
                } else if pending_read > 0 {
                    // Trailing items were all filtered or skipped.
                    state.apply_chunk(pending_read, 0, pending_skipped);
                    self.persist_checkpoint(&state)?;
                }
                state.finish(ExecutionStatus::Completed);
                self.clear_checkpoint();
                tracing::info!(
                    job = self.job.as_str(),
                    step = self.name.as_str(),
                    items_read = state.items_read,
                    items_written = state.items_written,
                    items_skipped = state.items_skipped,
                    chunks = state.chunks_committed,
                    "Step complete"
                );
                return Ok(self.report(state, None));
            };

            pending_read += 1;

            let outcome = {
                let Step { chain, retry, .. } = self;
                retry.execute(|| chain.apply(item.clone()), |last| Err(last.clone()))
            };
            match outcome {
                Ok(Some(output)) => buffer.push(output),
                Ok(None) => {} // filtered: counts as read, no chunk append
                Err(err) => {
                    let skip_count = state.items_skipped + pending_skipped;
                    match self.skip_policy.decide(err.kind, skip_count) {
                        SkipDecision::Skip => {
                            pending_skipped += 1;
                            tracing::warn!(
                                job = self.job.as_str(),
                                step = self.name.as_str(),
                                kind = %err.kind,
                                code = %err.code,
                                skip_count = skip_count + 1,
                                skip_limit = self.skip_policy.skip_limit(),
                                "Skippable item error, item dropped"
                            );
                        }
                        SkipDecision::Fail => return Ok(self.fail(state, err)),
                    }
                }
            }

            if buffer.len() >= self.chunk_size {
                match self.commit(sink, &buffer, &mut state, pending_read, pending_skipped) {
                    Ok(()) => {
                        buffer.clear();
                        pending_read = 0;
                        pending_skipped = 0;
                    }
                    Err(CommitOutcome::ChunkFailed(err)) => return Ok(self.fail(state, err)),
                    Err(CommitOutcome::Infrastructure(err)) => return Err(err),
                }
            }
        }
    }

    /// Commit one chunk and fold the boundary into the execution state.
    fn commit(
        &self,
        sink: &mut dyn ItemSink<T>,
        chunk: &[T],
        state: &mut ExecutionState,
        pending_read: u64,
        pending_skipped: u64,
    ) -> Result<(), CommitOutcome> {
        if let Err(err) = sink.write_chunk(chunk) {
            tracing::error!(
                job = self.job.as_str(),
                step = self.name.as_str(),
                chunk_len = chunk.len(),
                kind = %err.kind,
                code = %err.code,
                "Chunk commit failed, rolling back"
            );
            return Err(CommitOutcome::ChunkFailed(err));
        }

        state.apply_chunk(pending_read, chunk.len() as u64, pending_skipped);
        debug_assert!(state.invariant_holds());
        self.persist_checkpoint(state)
            .map_err(CommitOutcome::Infrastructure)?;

        tracing::debug!(
            job = self.job.as_str(),
            step = self.name.as_str(),
            chunk = state.chunks_committed,
            chunk_len = chunk.len(),
            items_written = state.items_written,
            "Chunk committed"
        );
        Ok(())
    }

    /// Resolve the starting state, resuming from a checkpoint when present.
    ///
    /// A checkpoint persisted in the backend wins over an explicit
    /// `restart_from` one.
    fn initial_state(&self) -> Result<ExecutionState, BatchError> {
        let persisted = match &self.state_backend {
            Some(backend) => backend
                .get_checkpoint(&self.job, &self.name)
                .map_err(state_error)?,
            None => None,
        };
        match persisted.as_ref().or(self.restart_from.as_ref()) {
            Some(cp) => {
                tracing::info!(
                    job = self.job.as_str(),
                    step = self.name.as_str(),
                    items_read = cp.items_read,
                    items_written = cp.items_written,
                    "Resuming step from checkpoint"
                );
                Ok(ExecutionState::from_checkpoint(cp))
            }
            None => Ok(ExecutionState::new()),
        }
    }

    fn persist_checkpoint(&self, state: &ExecutionState) -> Result<(), BatchError> {
        if let Some(backend) = &self.state_backend {
            let checkpoint = state.checkpoint(chrono::Utc::now().to_rfc3339());
            backend
                .set_checkpoint(&self.job, &self.name, &checkpoint)
                .map_err(state_error)?;
        }
        Ok(())
    }

    /// Drop the checkpoint after completion so the next run starts fresh.
    fn clear_checkpoint(&self) {
        if let Some(backend) = &self.state_backend {
            if let Err(err) = backend.clear_checkpoint(&self.job, &self.name) {
                tracing::warn!(
                    job = self.job.as_str(),
                    step = self.name.as_str(),
                    error = %err,
                    "Failed to clear checkpoint after completion"
                );
            }
        }
    }

    fn fail(&self, mut state: ExecutionState, err: BatchError) -> ExecutionReport {
        state.finish(ExecutionStatus::Failed);
        tracing::error!(
            job = self.job.as_str(),
            step = self.name.as_str(),
            items_read = state.items_read,
            items_written = state.items_written,
            kind = %err.kind,
            code = %err.code,
            "Step failed"
        );
        self.report(state, Some(err))
    }

    fn report(&self, state: ExecutionState, error: Option<BatchError>) -> ExecutionReport {
        ExecutionReport {
            step: self.name.clone(),
            state,
            error,
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_token.as_ref().is_some_and(StopToken::is_stopped)
    }
}

enum CommitOutcome {
    /// Sink rejected the chunk: step fails, counters stay at the last boundary.
    ChunkFailed(BatchError),
    /// Checkpoint persistence failed.
    Infrastructure(BatchError),
}

/// Skip `offset` already-committed items at the head of the source.
fn fast_forward<T>(source: &mut dyn ItemSource<T>, offset: u64) -> Result<(), BatchError> {
    for _ in 0..offset {
        if source.next_item()?.is_none() {
            break;
        }
    }
    Ok(())
}

fn state_error(err: chunkflow_state::StateError) -> BatchError {
    BatchError::internal("STATE_BACKEND", err.to_string())
}
