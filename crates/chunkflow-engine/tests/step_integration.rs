//! End-to-end step scenarios: retry, skip, restart, and job wiring together.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use chunkflow_engine::{
    ExecutionReport, ItemSource, Job, RetryPolicy, SkipPolicy, StepBuilder, StopToken, VecSink,
    VecSource,
};
use chunkflow_state::{SqliteStateBackend, StateBackend};
use chunkflow_types::{BatchError, ErrorKind, ExecutionStatus, JobName, StepName};

/// Source that fails the read at one position, then recovers on the next run.
struct FlakyAtSource {
    next: i32,
    total: i32,
    fail_at: Option<i32>,
}

impl ItemSource<i32> for FlakyAtSource {
    fn next_item(&mut self) -> Result<Option<i32>, BatchError> {
        if self.next >= self.total {
            return Ok(None);
        }
        if self.fail_at == Some(self.next) {
            self.fail_at = None;
            return Err(BatchError::transient("READ_FLAKE", "read failed"));
        }
        let item = self.next;
        self.next += 1;
        Ok(Some(item))
    }
}

#[test]
fn hundred_items_in_ten_chunks() {
    let mut step = StepBuilder::new("batch", "load")
        .chunk_size(10)
        .retry_policy(RetryPolicy::new(3, vec![ErrorKind::Transient]))
        .skip_policy(SkipPolicy::new(vec![ErrorKind::Validation], 3))
        .build()
        .unwrap();
    let mut source = VecSource::new(0..100);
    let mut sink = VecSink::new();

    let report = step.execute(&mut source, &mut sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Completed);
    assert_eq!(report.state.items_read, 100);
    assert_eq!(report.state.items_written, 100);
    assert_eq!(report.state.chunks_committed, 10);
    assert_eq!(sink.commits(), 10);
}

#[test]
fn skippable_item_is_dropped_and_step_completes() {
    // Item 7 always fails validation; the skip policy absorbs it.
    let mut step = StepBuilder::new("batch", "load")
        .chunk_size(3)
        .transform(|item: i32| {
            if item == 7 {
                Err(BatchError::validation("BAD_ITEM", "item 7 is invalid"))
            } else {
                Ok(Some(item))
            }
        })
        .skip_policy(SkipPolicy::new(vec![ErrorKind::Validation], 3))
        .build()
        .unwrap();
    let mut source = VecSource::new(0..10);
    let mut sink = VecSink::new();

    let report = step.execute(&mut source, &mut sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Completed);
    assert_eq!(report.state.items_read, 10);
    assert_eq!(report.state.items_written, 9);
    assert_eq!(report.state.items_skipped, 1);
    assert!(!sink.items().contains(&7));
}

#[test]
fn skip_limit_exhaustion_fails_the_step() {
    // Four bad items against a limit of three: the fourth fails the step.
    let mut step = StepBuilder::new("batch", "load")
        .chunk_size(100)
        .transform(|item: i32| {
            if item % 2 == 0 {
                Err(BatchError::validation("BAD_ITEM", "even items are invalid"))
            } else {
                Ok(Some(item))
            }
        })
        .skip_policy(SkipPolicy::new(vec![ErrorKind::Validation], 3))
        .build()
        .unwrap();
    let mut source = VecSource::new(0..10);
    let mut sink = VecSink::new();

    let report = step.execute(&mut source, &mut sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert_eq!(report.error.unwrap().kind, ErrorKind::Validation);
    // Nothing committed: the step died before the first chunk boundary, so
    // the counters still read the initial state.
    assert_eq!(sink.commits(), 0);
    assert_eq!(report.state.items_written, 0);
    assert_eq!(report.state.items_skipped, 0);
}

#[test]
fn transient_failure_is_retried_then_succeeds() {
    let attempts = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&attempts);
    let mut step = StepBuilder::new("batch", "load")
        .chunk_size(5)
        .transform(move |item: i32| {
            if item == 3 && *counter.borrow() < 2 {
                *counter.borrow_mut() += 1;
                Err(BatchError::transient("FLAKY", "try again"))
            } else {
                Ok(Some(item))
            }
        })
        .retry_policy(RetryPolicy::new(3, vec![ErrorKind::Transient]))
        .build()
        .unwrap();
    let mut source = VecSource::new(0..10);
    let mut sink = VecSink::new();

    let report = step.execute(&mut source, &mut sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Completed);
    assert_eq!(report.state.items_written, 10);
    assert_eq!(*attempts.borrow(), 2);
}

#[test]
fn retry_exhaustion_on_non_skippable_kind_fails_after_prior_chunks() {
    // Item 12 fails all three attempts; transient is not skippable here, so
    // the step fails with only the first two chunks committed.
    let mut step = StepBuilder::new("batch", "load")
        .chunk_size(5)
        .transform(|item: i32| {
            if item == 12 {
                Err(BatchError::transient("STUCK", "never recovers"))
            } else {
                Ok(Some(item))
            }
        })
        .retry_policy(RetryPolicy::new(3, vec![ErrorKind::Transient]))
        .skip_policy(SkipPolicy::new(vec![ErrorKind::Validation], 3))
        .build()
        .unwrap();
    let mut source = VecSource::new(0..20);
    let mut sink = VecSink::new();

    let report = step.execute(&mut source, &mut sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert_eq!(report.error.unwrap().code, "STUCK");
    assert_eq!(sink.commits(), 2);
    assert_eq!(report.state.items_written, 10);
    assert_eq!(report.state.items_read, 10);
}

#[test]
fn restart_after_failure_never_recommits_items() {
    let backend: Arc<dyn StateBackend> = Arc::new(SqliteStateBackend::in_memory().unwrap());
    let job = JobName::new("restartable");
    let step_name = StepName::new("load");

    // First run: the source breaks mid-way, after two committed chunks.
    let mut step = StepBuilder::new(job.clone(), step_name.clone())
        .chunk_size(5)
        .state_backend(Arc::clone(&backend))
        .build()
        .unwrap();
    let mut source = FlakyAtSource {
        next: 0,
        total: 23,
        fail_at: Some(13),
    };
    let mut sink = VecSink::new();

    let report = step.execute(&mut source, &mut sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert_eq!(report.state.items_written, 10);

    let checkpoint = backend.get_checkpoint(&job, &step_name).unwrap().unwrap();
    assert_eq!(checkpoint.items_read, 10);

    // Second run against a fresh source: resumes past the committed items.
    let mut step = StepBuilder::new(job.clone(), step_name.clone())
        .chunk_size(5)
        .state_backend(Arc::clone(&backend))
        .build()
        .unwrap();
    let mut source = FlakyAtSource {
        next: 0,
        total: 23,
        fail_at: None,
    };
    let mut resumed_sink = VecSink::new();

    let report = step.execute(&mut source, &mut resumed_sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Completed);
    assert_eq!(report.state.items_read, 23);
    assert_eq!(report.state.items_written, 23);

    // Items 0..10 were committed in the first run only.
    assert_eq!(resumed_sink.items().first(), Some(&10));
    let mut all: Vec<i32> = sink.items().to_vec();
    all.extend_from_slice(resumed_sink.items());
    assert_eq!(all, (0..23).collect::<Vec<_>>());

    // Completion clears the checkpoint.
    assert!(backend.get_checkpoint(&job, &step_name).unwrap().is_none());
}

#[test]
fn completed_step_restarts_from_scratch() {
    let backend: Arc<dyn StateBackend> = Arc::new(SqliteStateBackend::in_memory().unwrap());

    for _ in 0..2 {
        let mut step = StepBuilder::new("rerun", "load")
            .chunk_size(4)
            .state_backend(Arc::clone(&backend))
            .build()
            .unwrap();
        let mut source = VecSource::new(0..9);
        let mut sink = VecSink::new();

        let report = step.execute(&mut source, &mut sink).unwrap();
        assert_eq!(report.status(), ExecutionStatus::Completed);
        // No stale checkpoint: every run processes the full source.
        assert_eq!(report.state.items_read, 9);
        assert_eq!(sink.items().len(), 9);
    }
}

#[test]
fn stop_token_yields_stopped_status_and_keeps_checkpoint() {
    let backend: Arc<dyn StateBackend> = Arc::new(SqliteStateBackend::in_memory().unwrap());
    let token = StopToken::new();
    token.stop();

    let mut step = StepBuilder::new("stoppable", "load")
        .chunk_size(5)
        .state_backend(Arc::clone(&backend))
        .stop_token(token)
        .build()
        .unwrap();
    let mut source = VecSource::new(0..100);
    let mut sink = VecSink::new();

    let report = step.execute(&mut source, &mut sink).unwrap();
    assert_eq!(report.status(), ExecutionStatus::Stopped);
    assert_eq!(report.state.items_read, 0);
    assert_eq!(sink.commits(), 0);
}

#[test]
fn job_runs_steps_and_records_history() {
    let backend = Arc::new(SqliteStateBackend::in_memory().unwrap());

    fn run_step(
        job: &str,
        name: &str,
        items: Vec<i32>,
        backend: Arc<dyn StateBackend>,
    ) -> Result<ExecutionReport, BatchError> {
        let mut step = StepBuilder::new(job, name)
            .chunk_size(2)
            .state_backend(backend)
            .build()?;
        let mut source = VecSource::new(items);
        let mut sink = VecSink::new();
        step.execute(&mut source, &mut sink)
    }

    let step_backend: Arc<dyn StateBackend> = Arc::clone(&backend) as Arc<dyn StateBackend>;
    let first_backend = Arc::clone(&step_backend);
    let second_backend = Arc::clone(&step_backend);

    let mut job = Job::new("pipeline")
        .step("extract", move || {
            run_step("pipeline", "extract", vec![1, 2, 3], Arc::clone(&first_backend))
        })
        .step("load", move || {
            run_step("pipeline", "load", vec![4, 5], Arc::clone(&second_backend))
        })
        .state_backend(Arc::clone(&backend) as Arc<dyn StateBackend>);

    let report = job.run().unwrap();
    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.summary().items_written, 5);

    let runs = backend.recent_runs(&JobName::new("pipeline"), 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, ExecutionStatus::Completed);
    assert_eq!(runs[0].summary.items_read, 5);
}
