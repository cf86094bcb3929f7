//! Shared model types for the chunkflow batch engine.
//!
//! Pure data types used across the engine, state, and CLI crates: the
//! classified [`BatchError`], execution status and counters, and the
//! checkpoint record that enables restart.

#![warn(clippy::pedantic)]

pub mod error;
pub mod execution;
pub mod state;

pub use error::{BackoffClass, BatchError, ErrorKind};
pub use execution::{ExecutionState, StepCheckpoint};
pub use state::{ExecutionStatus, JobName, RunSummary, StepName};
