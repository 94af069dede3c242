//! [`Precacher`] — a [`Poller`] wired straight into a [`CacheActor`].

use std::sync::Arc;
use std::time::Duration;

use super::cache::{CacheActor, Snapshot};
use super::error::PollError;
use super::options::PollerOptions;
use super::poller::Poller;
use super::producer::Producer;
use super::runner::PollerState;

/// Caches the values a [`Producer`] yields at regular intervals.
///
/// Request handlers read the cache with [`results`](Self::results) and never
/// wait on the upstream call. A failed refresh keeps serving the previous
/// value, alongside the error.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use precache::poll::{PollError, PollerOptions, Precacher};
///
/// # #[tokio::main] async fn main() {
/// let location = Precacher::new(
///     || async { Ok::<_, std::io::Error>(Some("Toronto, ON")) },
///     Duration::from_secs(120),
///     PollerOptions::new(),
/// )
/// .unwrap();
///
/// // Nothing has been produced yet.
/// assert_eq!(location.results().unwrap_err(), PollError::CacheEmpty);
/// location.stop();
/// # }
/// ```
pub struct Precacher<V, E> {
    poller: Poller,
    cache: Arc<CacheActor<V, E>>,
}

impl<V, E> Precacher<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Starts refreshing `producer` every `interval`.
    ///
    /// # Errors
    ///
    /// - [`PollError::InvalidInterval`] if `interval` is zero.
    /// - [`PollError::NoRuntime`] if called outside a Tokio runtime.
    pub fn new<P>(producer: P, interval: Duration, options: PollerOptions) -> Result<Self, PollError>
    where
        P: Producer<Value = V, Error = E>,
    {
        let cache = Arc::new(CacheActor::new());
        let poller = Poller::new(producer, interval, Arc::clone(&cache), options)?;
        Ok(Self { poller, cache })
    }
}

impl<V, E> Precacher<V, E> {
    /// Returns `true` once the first refresh has completed.
    pub fn is_populated(&self) -> bool {
        self.cache.is_populated()
    }

    /// Stops refreshing. The cache keeps its last contents and remains
    /// readable.
    pub fn stop(&self) {
        self.poller.stop();
    }

    /// Stops refreshing and waits for the poll task to exit.
    pub async fn shutdown(&self) {
        self.poller.shutdown().await;
    }

    pub fn state(&self) -> PollerState {
        self.poller.state()
    }
}

impl<V: Clone, E> Precacher<V, E> {
    /// Returns the latest cached results.
    ///
    /// # Errors
    ///
    /// [`PollError::CacheEmpty`] until the first refresh has completed.
    pub fn results(&self) -> Result<Snapshot<V, E>, PollError> {
        self.cache.results()
    }
}

impl<V, E> std::fmt::Debug for Precacher<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Precacher")
            .field("state", &self.state())
            .field("populated", &self.is_populated())
            .finish()
    }
}
