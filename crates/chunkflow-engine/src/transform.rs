//! Transform chain composition and common stages.
//!
//! A chain applies its stages in order and short-circuits the moment any
//! stage filters the item out. The chunk driver wraps the whole chain in
//! one retry controller, so a retried item re-runs every stage; stateful
//! stages like [`DedupTransform`] belong at the end of the chain for that
//! reason.

use std::collections::HashSet;
use std::hash::Hash;

use chunkflow_types::BatchError;

use crate::item::Transform;

/// Ordered list of transform stages applied as one unit.
///
/// An empty chain is the identity transform.
pub struct TransformChain<T> {
    stages: Vec<Box<dyn Transform<T>>>,
}

impl<T> TransformChain<T> {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, stage: impl Transform<T> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append a boxed stage.
    pub fn push(&mut self, stage: Box<dyn Transform<T>>) {
        self.stages.push(stage);
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Thread one item through every stage.
    ///
    /// Returns `Ok(None)` as soon as any stage filters the item, skipping
    /// the remaining stages.
    ///
    /// # Errors
    ///
    /// Propagates the first stage error unchanged.
    pub fn apply(&mut self, item: T) -> Result<Option<T>, BatchError> {
        let mut current = item;
        for stage in &mut self.stages {
            match stage.apply(current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl<T> Default for TransformChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage that fails items not satisfying a predicate.
///
/// Emits a classified validation error carrying the given code and message.
pub struct ValidatingTransform<T, P> {
    predicate: P,
    code: String,
    message: String,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T, P: Fn(&T) -> bool> ValidatingTransform<T, P> {
    /// Validate items with `predicate`; failures raise `code`/`message`.
    pub fn new(predicate: P, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            predicate,
            code: code.into(),
            message: message.into(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, P: Fn(&T) -> bool> Transform<T> for ValidatingTransform<T, P> {
    fn apply(&mut self, item: T) -> Result<Option<T>, BatchError> {
        if (self.predicate)(&item) {
            Ok(Some(item))
        } else {
            Err(BatchError::validation(
                self.code.clone(),
                self.message.clone(),
            ))
        }
    }
}

/// Stage that drops or rejects items whose key was already seen.
///
/// With `filter_duplicates` the duplicate is filtered out; without it the
/// duplicate raises a validation error. Seen-keys live for one step
/// execution.
pub struct DedupTransform<T, K, F> {
    key_fn: F,
    seen: HashSet<K>,
    filter_duplicates: bool,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T, K: Eq + Hash, F: Fn(&T) -> K> DedupTransform<T, K, F> {
    /// Deduplicate on `key_fn`; duplicates are filtered when
    /// `filter_duplicates` is set, rejected otherwise.
    pub fn new(key_fn: F, filter_duplicates: bool) -> Self {
        Self {
            key_fn,
            seen: HashSet::new(),
            filter_duplicates,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, K: Eq + Hash, F: Fn(&T) -> K> Transform<T> for DedupTransform<T, K, F> {
    fn apply(&mut self, item: T) -> Result<Option<T>, BatchError> {
        let key = (self.key_fn)(&item);
        if self.seen.insert(key) {
            Ok(Some(item))
        } else if self.filter_duplicates {
            Ok(None)
        } else {
            Err(BatchError::validation(
                "DUPLICATE_KEY",
                "item key was already processed in this step",
            ))
        }
    }
}
