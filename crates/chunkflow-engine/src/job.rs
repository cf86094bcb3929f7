//! Job sequencing: ordered steps with run history tracking.
//!
//! A job runs its steps in order and aborts the sequence at the first step
//! that does not complete. Independent steps of different jobs may run
//! concurrently; within one job the order is the contract.

use std::sync::Arc;

use chunkflow_state::StateBackend;
use chunkflow_types::{
    BatchError, ExecutionState, ExecutionStatus, JobName, RunSummary, StepName,
};

use crate::step::ExecutionReport;

/// Observer of step lifecycle within a job, notified synchronously.
pub trait StepListener {
    /// A step is about to run.
    fn before_step(&self, step: &StepName) {
        let _ = step;
    }

    /// A step reached a terminal status.
    fn after_step(&self, step: &StepName, state: &ExecutionState) {
        let _ = (step, state);
    }
}

type StepFn = Box<dyn FnMut() -> Result<ExecutionReport, BatchError>>;

/// Final report of one job run.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: JobName,
    pub status: ExecutionStatus,
    pub steps: Vec<ExecutionReport>,
    pub run_id: Option<i64>,
}

impl JobReport {
    /// Aggregate counters across all executed steps.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for report in &self.steps {
            summary.items_read += report.state.items_read;
            summary.items_written += report.state.items_written;
            summary.items_skipped += report.state.items_skipped;
        }
        summary.error_message = self
            .steps
            .iter()
            .find_map(|r| r.error.as_ref().map(ToString::to_string));
        summary
    }
}

/// Named, ordered sequence of step executions.
pub struct Job {
    name: JobName,
    steps: Vec<(StepName, StepFn)>,
    listeners: Vec<Box<dyn StepListener>>,
    state_backend: Option<Arc<dyn StateBackend>>,
}

impl Job {
    /// New job with no steps.
    #[must_use]
    pub fn new(name: impl Into<JobName>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            listeners: Vec::new(),
            state_backend: None,
        }
    }

    /// The job name.
    #[must_use]
    pub fn name(&self) -> &JobName {
        &self.name
    }

    /// Append a step bound to its source and sink.
    #[must_use]
    pub fn step(
        mut self,
        name: impl Into<StepName>,
        runner: impl FnMut() -> Result<ExecutionReport, BatchError> + 'static,
    ) -> Self {
        self.steps.push((name.into(), Box::new(runner)));
        self
    }

    /// Attach a step lifecycle listener.
    #[must_use]
    pub fn listener(mut self, listener: Box<dyn StepListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Record run history in this backend.
    #[must_use]
    pub fn state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.state_backend = Some(backend);
        self
    }

    /// Run every step in order, stopping at the first non-completed one.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for infrastructure failures (run-history storage
    /// or step checkpointing); step failures are reported in the
    /// [`JobReport`] with status `Failed`.
    pub fn run(&mut self) -> Result<JobReport, BatchError> {
        tracing::info!(job = self.name.as_str(), steps = self.steps.len(), "Starting job run");

        let run_id = match &self.state_backend {
            Some(backend) => Some(backend.start_run(&self.name).map_err(state_error)?),
            None => None,
        };

        let mut report = JobReport {
            job: self.name.clone(),
            status: ExecutionStatus::Completed,
            steps: Vec::new(),
            run_id,
        };

        let mut infra_error: Option<BatchError> = None;
        for (name, runner) in &mut self.steps {
            for listener in &self.listeners {
                listener.before_step(name);
            }

            let step_report = match runner() {
                Ok(step_report) => step_report,
                Err(err) => {
                    infra_error = Some(err);
                    break;
                }
            };

            for listener in &self.listeners {
                listener.after_step(name, &step_report.state);
            }

            let status = step_report.status();
            report.steps.push(step_report);

            if status != ExecutionStatus::Completed {
                report.status = status;
                tracing::error!(
                    job = self.name.as_str(),
                    step = name.as_str(),
                    status = %status,
                    "Step did not complete, aborting job"
                );
                break;
            }
        }

        if let Some(err) = infra_error {
            self.record_run(run_id, ExecutionStatus::Failed, &report, Some(&err));
            return Err(err);
        }

        self.record_run(run_id, report.status, &report, None);
        tracing::info!(
            job = self.name.as_str(),
            status = %report.status,
            steps_run = report.steps.len(),
            "Job run finished"
        );
        Ok(report)
    }

    fn record_run(
        &self,
        run_id: Option<i64>,
        status: ExecutionStatus,
        report: &JobReport,
        infra_error: Option<&BatchError>,
    ) {
        let (Some(backend), Some(run_id)) = (&self.state_backend, run_id) else {
            return;
        };
        let mut summary = report.summary();
        if let Some(err) = infra_error {
            summary.error_message = Some(err.to_string());
        }
        if let Err(err) = backend.complete_run(run_id, status, &summary) {
            tracing::warn!(
                job = self.name.as_str(),
                run_id,
                error = %err,
                "Failed to record run completion"
            );
        }
    }
}

fn state_error(err: chunkflow_state::StateError) -> BatchError {
    BatchError::internal("STATE_BACKEND", err.to_string())
}
