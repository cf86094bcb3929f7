//! Bounded retry around a single-item operation.
//!
//! [`RetryController::execute`] re-invokes an operation on classified
//! retryable failures up to a bounded attempt count, invokes a recovery
//! path exactly once on exhaustion, and notifies listeners at lifecycle
//! points. Non-retryable kinds propagate immediately without consuming
//! attempts and without recovery.

use std::time::Duration;

use chunkflow_types::{BackoffClass, BatchError, ErrorKind};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Retry bounds and error classification for one operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Error kinds that are re-invoked instead of propagated.
    pub retry_on: Vec<ErrorKind>,
    /// Sleep between attempts using the error's backoff hint.
    ///
    /// Off by default so item-level retries stay hot.
    pub backoff_enabled: bool,
}

impl RetryPolicy {
    /// Policy retrying the given kinds up to `max_attempts` total attempts.
    #[must_use]
    pub fn new(max_attempts: u32, retry_on: impl Into<Vec<ErrorKind>>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_on: retry_on.into(),
            backoff_enabled: false,
        }
    }

    /// Policy that never retries: every failure propagates on first attempt.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1, Vec::new())
    }

    /// Enable backoff sleeps between attempts.
    #[must_use]
    pub fn with_backoff(mut self) -> Self {
        self.backoff_enabled = true;
        self
    }

    /// Whether an error of this kind is retried under this policy.
    #[must_use]
    pub fn retries(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Observer of retry lifecycle events, notified synchronously.
pub trait RetryListener {
    /// A retryable operation is about to start.
    fn on_open(&self) {}

    /// Attempt `attempt` failed with `error`.
    fn on_error(&self, attempt: u32, error: &BatchError) {
        let _ = (attempt, error);
    }

    /// The operation reached a terminal outcome after `attempts` attempts.
    ///
    /// `final_error` is `Some` when the terminal outcome was a failure.
    fn on_close(&self, attempts: u32, final_error: Option<&BatchError>) {
        let _ = (attempts, final_error);
    }
}

/// Compute retry delay based on error hints and attempt number.
pub(crate) fn compute_backoff(err: &BatchError, attempt: u32) -> Duration {
    // If the error specified a retry_after, use it
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    // Exponential backoff based on backoff_class
    let base_ms: u64 = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let delay_ms = base_ms.saturating_mul(2u64.pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

/// Wraps a single-item operation with bounded retry and recovery.
pub struct RetryController {
    policy: RetryPolicy,
    listeners: Vec<Box<dyn RetryListener>>,
}

impl RetryController {
    /// Controller with the given policy and no listeners.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            listeners: Vec::new(),
        }
    }

    /// Attach a lifecycle listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Box<dyn RetryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The configured policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation`, retrying classified-retryable failures.
    ///
    /// Exactly one terminal outcome per call: a value from the operation or
    /// from `recovery`, or a propagated fatal error. `recovery` runs at most
    /// once, only after `max_attempts` retryable failures; its own error
    /// propagates without further retry.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable [`BatchError`], or the error produced
    /// by `recovery` after exhaustion.
    pub fn execute<T>(
        &self,
        mut operation: impl FnMut() -> Result<T, BatchError>,
        recovery: impl FnOnce(&BatchError) -> Result<T, BatchError>,
    ) -> Result<T, BatchError> {
        for listener in &self.listeners {
            listener.on_open();
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation() {
                Ok(value) => {
                    self.notify_close(attempt, None);
                    return Ok(value);
                }
                Err(err) if self.policy.retries(err.kind) => {
                    for listener in &self.listeners {
                        listener.on_error(attempt, &err);
                    }
                    if attempt >= self.policy.max_attempts {
                        tracing::warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            kind = %err.kind,
                            code = %err.code,
                            "Retry attempts exhausted, invoking recovery"
                        );
                        let outcome = recovery(&err);
                        self.notify_close(attempt, outcome.as_ref().err());
                        return outcome;
                    }
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        kind = %err.kind,
                        code = %err.code,
                        "Retryable error, will retry"
                    );
                    if self.policy.backoff_enabled {
                        std::thread::sleep(compute_backoff(&err, attempt));
                    }
                }
                Err(err) => {
                    for listener in &self.listeners {
                        listener.on_error(attempt, &err);
                    }
                    self.notify_close(attempt, Some(&err));
                    return Err(err);
                }
            }
        }
    }

    fn notify_close(&self, attempts: u32, final_error: Option<&BatchError>) {
        for listener in &self.listeners {
            listener.on_close(attempts, final_error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingListener {
        opens: RefCell<u32>,
        errors: RefCell<Vec<u32>>,
        closes: RefCell<Vec<(u32, bool)>>,
    }

    impl RetryListener for Rc<RecordingListener> {
        fn on_open(&self) {
            *self.opens.borrow_mut() += 1;
        }

        fn on_error(&self, attempt: u32, _error: &BatchError) {
            self.errors.borrow_mut().push(attempt);
        }

        fn on_close(&self, attempts: u32, final_error: Option<&BatchError>) {
            self.closes
                .borrow_mut()
                .push((attempts, final_error.is_some()));
        }
    }

    fn transient_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, vec![ErrorKind::Transient])
    }

    #[test]
    fn success_on_first_attempt() {
        let controller = RetryController::new(transient_policy(3));
        let result = controller.execute(
            || Ok::<_, BatchError>(7),
            |_| panic!("recovery must not run"),
        );
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn retries_until_success() {
        let controller = RetryController::new(transient_policy(3));
        let mut calls = 0;
        let result = controller.execute(
            || {
                calls += 1;
                if calls < 3 {
                    Err(BatchError::transient("FLAKY", "try again"))
                } else {
                    Ok(calls)
                }
            },
            |_| panic!("recovery must not run"),
        );
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn exhaustion_invokes_recovery_exactly_once() {
        let controller = RetryController::new(transient_policy(3));
        let calls = RefCell::new(0u32);
        let recoveries = RefCell::new(0u32);
        let result = controller.execute(
            || {
                *calls.borrow_mut() += 1;
                Err::<i32, _>(BatchError::transient("ALWAYS", "always fails"))
            },
            |last| {
                *recoveries.borrow_mut() += 1;
                assert_eq!(last.code, "ALWAYS");
                Ok(-1)
            },
        );
        assert_eq!(result.unwrap(), -1);
        // max_attempts counts the first invocation
        assert_eq!(*calls.borrow(), 3);
        assert_eq!(*recoveries.borrow(), 1);
    }

    #[test]
    fn non_retryable_propagates_without_recovery() {
        let controller = RetryController::new(transient_policy(5));
        let mut calls = 0;
        let result: Result<i32, _> = controller.execute(
            || {
                calls += 1;
                Err(BatchError::validation("BAD", "not retryable here"))
            },
            |_| panic!("recovery must not run"),
        );
        assert_eq!(calls, 1);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
    }

    #[test]
    fn failing_recovery_is_fatal() {
        let controller = RetryController::new(transient_policy(2));
        let result: Result<i32, _> = controller.execute(
            || Err(BatchError::transient("ALWAYS", "always fails")),
            |_| Err(BatchError::internal("NO_FALLBACK", "recovery failed")),
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::Internal);
    }

    #[test]
    fn listeners_observe_lifecycle() {
        let listener = Rc::new(RecordingListener::default());
        let controller = RetryController::new(transient_policy(3))
            .with_listener(Box::new(Rc::clone(&listener)));

        let mut calls = 0;
        let _ = controller.execute(
            || {
                calls += 1;
                if calls < 2 {
                    Err(BatchError::transient("FLAKY", "try again"))
                } else {
                    Ok(())
                }
            },
            |_| Ok(()),
        );

        assert_eq!(*listener.opens.borrow(), 1);
        assert_eq!(listener.errors.borrow().as_slice(), &[1]);
        assert_eq!(listener.closes.borrow().as_slice(), &[(2, false)]);
    }

    #[test]
    fn listeners_see_terminal_error() {
        let listener = Rc::new(RecordingListener::default());
        let controller = RetryController::new(RetryPolicy::none())
            .with_listener(Box::new(Rc::clone(&listener)));

        let result: Result<(), _> = controller.execute(
            || Err(BatchError::validation("BAD", "nope")),
            |_| panic!("recovery must not run"),
        );
        assert!(result.is_err());
        assert_eq!(listener.closes.borrow().as_slice(), &[(1, true)]);
    }

    #[test]
    fn max_attempts_floor_is_one() {
        let policy = RetryPolicy::new(0, vec![ErrorKind::Transient]);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn backoff_fast_doubles_per_attempt() {
        let err = BatchError::transient("X", "y");
        assert_eq!(compute_backoff(&err, 1), Duration::from_millis(100));
        assert_eq!(compute_backoff(&err, 2), Duration::from_millis(200));
        assert_eq!(compute_backoff(&err, 3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_respects_retry_after() {
        let err = BatchError::transient("X", "y").with_retry_after_ms(7500);
        assert_eq!(compute_backoff(&err, 1), Duration::from_millis(7500));
        assert_eq!(compute_backoff(&err, 5), Duration::from_millis(7500));
    }

    #[test]
    fn backoff_capped_at_60s() {
        let err = BatchError::validation("X", "y");
        assert_eq!(compute_backoff(&err, 20), Duration::from_millis(60_000));
    }
}
