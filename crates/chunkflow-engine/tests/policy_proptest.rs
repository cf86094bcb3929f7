//! Property tests for the chunking, skip, and retry laws.

use proptest::prelude::*;

use chunkflow_engine::{RetryController, RetryPolicy, SkipDecision, SkipPolicy, StepBuilder, VecSink, VecSource};
use chunkflow_types::{BatchError, ErrorKind, ExecutionStatus};

proptest! {
    /// A completed step commits exactly ceil(survivors / chunk_size) chunks,
    /// and the committed chunk lengths sum to the written count.
    #[test]
    fn chunk_count_law(total in 0usize..500, chunk_size in 1usize..32) {
        let mut step = StepBuilder::new("prop", "chunks")
            .chunk_size(chunk_size)
            .build()
            .unwrap();
        let mut source = VecSource::new(0..total as i32);
        let mut sink = VecSink::new();

        let report = step.execute(&mut source, &mut sink).unwrap();
        prop_assert_eq!(report.status(), ExecutionStatus::Completed);
        prop_assert_eq!(report.state.items_written as usize, total);
        prop_assert_eq!(sink.commits(), total.div_ceil(chunk_size));
        prop_assert_eq!(sink.chunk_sizes().iter().sum::<usize>(), total);
        // Every chunk but the last is full.
        if let Some((last, full)) = sink.chunk_sizes().split_last() {
            prop_assert!(full.iter().all(|&len| len == chunk_size));
            prop_assert!(*last <= chunk_size);
        }
    }

    /// Filtering changes the written count, never the read count, and the
    /// invariant read >= written + skipped always holds.
    #[test]
    fn filter_law(total in 0usize..300, chunk_size in 1usize..16, modulus in 1i32..10) {
        let mut step = StepBuilder::new("prop", "filter")
            .chunk_size(chunk_size)
            .transform(move |item: i32| {
                if item % modulus == 0 { Ok(Some(item)) } else { Ok(None) }
            })
            .build()
            .unwrap();
        let mut source = VecSource::new(0..total as i32);
        let mut sink = VecSink::new();

        let report = step.execute(&mut source, &mut sink).unwrap();
        let survivors = (0..total as i32).filter(|i| i % modulus == 0).count();
        prop_assert_eq!(report.state.items_read as usize, total);
        prop_assert_eq!(report.state.items_written as usize, survivors);
        prop_assert!(report.state.invariant_holds());
    }

    /// The skip decision is a pure function of kind and count.
    #[test]
    fn skip_decision_law(limit in 0u64..100, count in 0u64..200) {
        let policy = SkipPolicy::new(vec![ErrorKind::Validation], limit);
        let expected = if count < limit { SkipDecision::Skip } else { SkipDecision::Fail };
        prop_assert_eq!(policy.decide(ErrorKind::Validation, count), expected);
        // Undeclared kinds never skip, whatever the count.
        prop_assert_eq!(policy.decide(ErrorKind::Transient, count), SkipDecision::Fail);
    }

    /// A step with skippable failures completes iff the number of failing
    /// items stays within the limit, and written + skipped == read.
    #[test]
    fn skip_limit_law(total in 1usize..120, bad_every in 2i32..8, limit in 0u64..40) {
        let mut step = StepBuilder::new("prop", "skips")
            .chunk_size(7)
            .transform(move |item: i32| {
                if item % bad_every == 0 {
                    Err(BatchError::validation("BAD", "generated failure"))
                } else {
                    Ok(Some(item))
                }
            })
            .skip_policy(SkipPolicy::new(vec![ErrorKind::Validation], limit))
            .build()
            .unwrap();
        let mut source = VecSource::new(0..total as i32);
        let mut sink = VecSink::new();

        let bad = (0..total as i32).filter(|i| i % bad_every == 0).count() as u64;
        let report = step.execute(&mut source, &mut sink).unwrap();

        if bad <= limit {
            prop_assert_eq!(report.status(), ExecutionStatus::Completed);
            prop_assert_eq!(report.state.items_skipped, bad);
            prop_assert_eq!(
                report.state.items_written + report.state.items_skipped,
                report.state.items_read
            );
        } else {
            prop_assert_eq!(report.status(), ExecutionStatus::Failed);
        }
        prop_assert!(report.state.invariant_holds());
    }

    /// Retry invokes the operation exactly min(failures + 1, max_attempts)
    /// times when the failure streak is finite, and exactly max_attempts
    /// times (plus one recovery) when it never succeeds.
    #[test]
    fn retry_attempt_law(max_attempts in 1u32..8, failures in 0u32..12) {
        let controller = RetryController::new(
            RetryPolicy::new(max_attempts, vec![ErrorKind::Transient]),
        );
        let mut calls = 0u32;
        let mut recoveries = 0u32;
        let result = controller.execute(
            || {
                calls += 1;
                if calls <= failures {
                    Err(BatchError::transient("GEN", "generated failure"))
                } else {
                    Ok(calls)
                }
            },
            |_| {
                recoveries += 1;
                Ok(0)
            },
        );

        prop_assert!(result.is_ok());
        if failures < max_attempts {
            prop_assert_eq!(calls, failures + 1);
            prop_assert_eq!(recoveries, 0);
        } else {
            prop_assert_eq!(calls, max_attempts);
            prop_assert_eq!(recoveries, 1);
        }
    }
}
