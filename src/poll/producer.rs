//! The [`Producer`] capability and the [`Outcome`] of a single tick.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The value/error pair produced by one tick.
///
/// Both halves are optional and independent: a producer may report nothing
/// (`value: None, error: None`, e.g. nothing is playing right now), a
/// value, an error, or a value together with an error. The error is shared
/// behind an [`Arc`] so outcomes stay cheap to clone even when `E` is not
/// `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct Outcome<V, E> {
    pub value: Option<V>,
    pub error: Option<Arc<E>>,
}

impl<V, E> Outcome<V, E> {
    /// Creates an outcome from its raw parts.
    pub fn new(value: Option<V>, error: Option<E>) -> Self {
        Self {
            value,
            error: error.map(Arc::new),
        }
    }

    /// An outcome carrying only a value.
    pub fn value(value: V) -> Self {
        Self::new(Some(value), None)
    }

    /// An outcome carrying only an error.
    pub fn error(error: E) -> Self {
        Self::new(None, Some(error))
    }

    /// "Nothing available this tick" — neither a value nor an error.
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    /// Returns `true` if the producer reported an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns `true` if the outcome carries neither a value nor an error.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }
}

impl<V: Clone, E> Clone for Outcome<V, E> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            error: self.error.clone(),
        }
    }
}

impl<V, E> From<Result<Option<V>, E>> for Outcome<V, E> {
    fn from(result: Result<Option<V>, E>) -> Self {
        match result {
            Ok(value) => Self::new(value, None),
            Err(error) => Self::error(error),
        }
    }
}

/// A source of values refreshed on a schedule.
///
/// Implementations wrap whatever upstream call should be cached: a
/// geocoding lookup, a commit history query, the currently playing track.
/// A call may take arbitrarily long; the polling layer imposes no timeout
/// of its own, but it drops the returned future when stopped, so a
/// producer is cancelled at its next `.await` point.
///
/// Any `Fn() -> impl Future<Output = Result<Option<V>, E>>` closure is a
/// producer:
///
/// ```rust
/// use precache::poll::Producer;
///
/// fn assert_producer<P: Producer>(_: &P) {}
///
/// let now_playing = || async { Ok::<_, std::io::Error>(Some("track")) };
/// assert_producer(&now_playing);
/// ```
pub trait Producer: Send + Sync + 'static {
    /// The value type cached on success.
    type Value: Send + 'static;

    /// The error type reported on failure.
    type Error: fmt::Display + Send + Sync + 'static;

    /// Computes one outcome.
    fn produce(&self) -> impl Future<Output = Outcome<Self::Value, Self::Error>> + Send;
}

impl<F, Fut, V, E> Producer for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<V>, E>> + Send,
    V: Send + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn produce(&self) -> impl Future<Output = Outcome<V, E>> + Send {
        let fut = self();
        async move { Outcome::from(fut.await) }
    }
}
