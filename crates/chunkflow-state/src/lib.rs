//! Execution state persistence for the chunkflow batch engine.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for step checkpoints and job run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::{RunRecord, StateBackend};
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
