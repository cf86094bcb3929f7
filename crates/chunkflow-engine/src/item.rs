//! Item flow contracts: source, sink, and transform stage.
//!
//! The engine is generic over the item type and imposes no structure on it
//! beyond what individual transforms require. In-memory implementations
//! live here for tests and list-driven jobs; file adapters belong to the
//! CLI crate.

use chunkflow_types::BatchError;

/// Produces a lazy, finite sequence of items.
///
/// `Ok(None)` signals exhaustion. Implementations must keep returning
/// `Ok(None)` on calls after exhaustion.
pub trait ItemSource<T> {
    /// Pull the next item.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] when the underlying read fails.
    fn next_item(&mut self) -> Result<Option<T>, BatchError>;
}

/// Accepts a finite chunk of items and durably commits them as one unit.
///
/// A call either commits the whole chunk or leaves no partial writes
/// observable; atomicity within the call is the sink's responsibility.
pub trait ItemSink<T> {
    /// Write one chunk atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] when the commit fails; the engine treats
    /// any sink failure as a rolled-back chunk.
    fn write_chunk(&mut self, chunk: &[T]) -> Result<(), BatchError>;
}

/// One transform stage: maps an item to zero-or-one output items.
///
/// `Ok(None)` filters the item out. A stage may fail with a classified
/// error, which the retry controller wrapping the whole chain observes.
pub trait Transform<T> {
    /// Apply this stage to one item.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] classified by the stage.
    fn apply(&mut self, item: T) -> Result<Option<T>, BatchError>;
}

/// Closures are transform stages.
impl<T, F> Transform<T> for F
where
    F: FnMut(T) -> Result<Option<T>, BatchError>,
{
    fn apply(&mut self, item: T) -> Result<Option<T>, BatchError> {
        self(item)
    }
}

/// In-memory source that drains a list front to back.
pub struct VecSource<T> {
    items: std::collections::VecDeque<T>,
}

impl<T> VecSource<T> {
    /// Wrap a list of items.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

impl<T> ItemSource<T> for VecSource<T> {
    fn next_item(&mut self) -> Result<Option<T>, BatchError> {
        Ok(self.items.pop_front())
    }
}

/// In-memory sink that collects committed chunks.
///
/// Keeps both the flat item list and the per-chunk boundaries so tests can
/// assert commit counts.
#[derive(Default)]
pub struct VecSink<T> {
    items: Vec<T>,
    chunk_sizes: Vec<usize>,
}

impl<T> VecSink<T> {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            chunk_sizes: Vec::new(),
        }
    }

    /// All committed items in commit order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Length of each committed chunk in commit order.
    #[must_use]
    pub fn chunk_sizes(&self) -> &[usize] {
        &self.chunk_sizes
    }

    /// Number of commits observed.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.chunk_sizes.len()
    }
}

impl<T: Clone> ItemSink<T> for VecSink<T> {
    fn write_chunk(&mut self, chunk: &[T]) -> Result<(), BatchError> {
        self.items.extend_from_slice(chunk);
        self.chunk_sizes.push(chunk.len());
        Ok(())
    }
}
