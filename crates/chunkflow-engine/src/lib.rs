//! Chunk-oriented batch execution engine.
//!
//! The engine reads items from an [`ItemSource`], threads them through a
//! retry-wrapped [`TransformChain`], accumulates them into fixed-size
//! chunks, and hands completed chunks to an [`ItemSink`] as one atomic
//! write, checkpointing progress at every chunk boundary so a failed or
//! stopped step can restart without re-processing committed items.

#![warn(clippy::pedantic)]

pub mod config;
pub mod item;
pub mod job;
pub mod retry;
pub mod skip;
pub mod step;
pub mod transform;

// Re-export public API for convenience
pub use item::{ItemSink, ItemSource, Transform, VecSink, VecSource};
pub use job::{Job, JobReport, StepListener};
pub use retry::{RetryController, RetryListener, RetryPolicy};
pub use skip::{SkipDecision, SkipPolicy};
pub use step::{ExecutionReport, Step, StepBuilder, StopToken};
pub use transform::{DedupTransform, TransformChain, ValidatingTransform};
