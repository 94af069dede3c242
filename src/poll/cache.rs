//! [`CacheActor`] — folds a sequence of outcomes into one readable snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::error::PollError;
use super::poller::Recv;
use super::producer::Outcome;

/// An immutable copy of a cache's contents.
///
/// `value` is the last value ever produced; `error` is the error reported
/// by the most recent tick (`None` if that tick succeeded). Both set means
/// the value is stale: the latest refresh failed and the previous good value
/// was kept.
#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot<V, E> {
    pub value: Option<V>,
    pub error: Option<Arc<E>>,
}

impl<V, E> Snapshot<V, E> {
    /// Returns `true` when the latest refresh failed but an older value is
    /// still available.
    pub fn is_stale(&self) -> bool {
        self.value.is_some() && self.error.is_some()
    }

    pub fn into_parts(self) -> (Option<V>, Option<Arc<E>>) {
        (self.value, self.error)
    }
}

impl<V: Clone, E> Clone for Snapshot<V, E> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            error: self.error.clone(),
        }
    }
}

struct CacheState<V, E> {
    snapshot: Snapshot<V, E>,
    populated: bool,
}

/// Single-writer cache of the last known good value and the latest error.
///
/// Exactly one poll task writes (through [`Recv`]); any number of readers
/// call [`results`](Self::results) concurrently. Both sides take the same
/// lock, but only for a field swap or a clone, so readers never wait on a
/// produce call.
pub struct CacheActor<V, E> {
    state: Mutex<CacheState<V, E>>,
}

impl<V, E> Default for CacheActor<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> CacheActor<V, E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                snapshot: Snapshot {
                    value: None,
                    error: None,
                },
                populated: false,
            }),
        }
    }

    // The state is replaced field by field with no intermediate invariants,
    // so a panicking holder cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, CacheState<V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` once any outcome has been received.
    pub fn is_populated(&self) -> bool {
        self.lock().populated
    }

    /// Folds one outcome into the cache.
    ///
    /// The error always replaces the previous one (clearing it on success);
    /// the value is replaced only when the outcome carries one.
    pub fn update(&self, outcome: Outcome<V, E>) {
        let Outcome { value, error } = outcome;
        let mut state = self.lock();
        state.populated = true;
        state.snapshot.error = error;
        if let Some(value) = value {
            state.snapshot.value = Some(value);
        }
        trace!(
            has_value = state.snapshot.value.is_some(),
            stale = state.snapshot.is_stale(),
            "cache updated"
        );
    }
}

impl<V: Clone, E> CacheActor<V, E> {
    /// Returns a copy of the cached value and latest error.
    ///
    /// # Errors
    ///
    /// [`PollError::CacheEmpty`] until the first outcome has arrived, even
    /// if that outcome turns out to be an error.
    pub fn results(&self) -> Result<Snapshot<V, E>, PollError> {
        let state = self.lock();
        if !state.populated {
            return Err(PollError::CacheEmpty);
        }
        Ok(state.snapshot.clone())
    }
}

impl<V, E> Recv<V, E> for CacheActor<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    fn recv(&self, outcome: Outcome<V, E>) {
        self.update(outcome);
    }
}
