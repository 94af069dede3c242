//! [`Preloader`] — mirrors an [`OutcomeStream`] into readable state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Span, debug};

use crate::poll::runner::{PollerState, TaskHandle};
use crate::poll::{CacheActor, PollError, Producer, Snapshot, StreamerOptions};

use super::streamer::{OutcomeStream, PollStreamer};

/// Keeps the latest outcome of a stream readable, e.g. the most recent
/// location history segment.
///
/// One consumer task drains the stream and is the only writer of the
/// preloader's [`CacheActor`], so readers get the same guarantees as with a
/// [`Precacher`](crate::poll::Precacher): a failed refresh keeps the
/// previous value, and [`results`](Self::results) reports
/// [`PollError::CacheEmpty`] until the first outcome.
pub struct Preloader<V, E> {
    cache: Arc<CacheActor<V, E>>,
    consumer: TaskHandle,
    streamer: Option<PollStreamer>,
}

impl<V, E> Preloader<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Consumes `stream` in a background task.
    ///
    /// The preloader does not control the producing side: stopping it stops
    /// consumption only, and it stops on its own when the stream ends.
    ///
    /// # Errors
    ///
    /// [`PollError::NoRuntime`] if called outside a Tokio runtime.
    pub fn new(stream: OutcomeStream<V, E>, span: Span) -> Result<Self, PollError> {
        let cache = Arc::new(CacheActor::new());
        let consumer = spawn_consumer(stream, Arc::clone(&cache), span)?;
        Ok(Self {
            cache,
            consumer,
            streamer: None,
        })
    }

    /// Polls `producer` every `interval` through an owned [`PollStreamer`]
    /// and preloads its outcomes.
    ///
    /// # Errors
    ///
    /// - [`PollError::InvalidInterval`] if `interval` is zero.
    /// - [`PollError::NoRuntime`] if called outside a Tokio runtime.
    pub fn spawn<P>(producer: P, interval: Duration, options: StreamerOptions) -> Result<Self, PollError>
    where
        P: Producer<Value = V, Error = E>,
    {
        let span = options.poller_options().task_span();
        let (streamer, stream) = PollStreamer::new(producer, interval, options)?;
        let mut preloader = Self::new(stream, span)?;
        preloader.streamer = Some(streamer);
        Ok(preloader)
    }
}

fn spawn_consumer<V, E>(
    mut stream: OutcomeStream<V, E>,
    cache: Arc<CacheActor<V, E>>,
    span: Span,
) -> Result<TaskHandle, PollError>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    TaskHandle::spawn(span, move |mut shutdown| async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                next = stream.next() => match next {
                    Some(outcome) => cache.update(outcome),
                    None => {
                        debug!("upstream stream ended");
                        break;
                    }
                },
            }
        }
    })
}

impl<V, E> Preloader<V, E> {
    pub fn is_populated(&self) -> bool {
        self.cache.is_populated()
    }

    /// Stops the owned streamer, if any, and the consumer task. The last
    /// mirrored results stay readable.
    pub fn stop(&self) {
        if let Some(streamer) = &self.streamer {
            streamer.stop();
        }
        self.consumer.stop();
    }

    /// Stops everything and waits for the background tasks to exit.
    pub async fn shutdown(&self) {
        if let Some(streamer) = &self.streamer {
            streamer.shutdown().await;
        }
        self.consumer.shutdown().await;
    }

    /// Lifecycle of the consumer task.
    pub fn state(&self) -> PollerState {
        self.consumer.state()
    }
}

impl<V: Clone, E> Preloader<V, E> {
    /// Returns the latest mirrored results.
    ///
    /// # Errors
    ///
    /// [`PollError::CacheEmpty`] until the first outcome has been mirrored.
    pub fn results(&self) -> Result<Snapshot<V, E>, PollError> {
        self.cache.results()
    }
}

impl<V, E> std::fmt::Debug for Preloader<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preloader")
            .field("state", &self.state())
            .field("populated", &self.is_populated())
            .field("owns_streamer", &self.streamer.is_some())
            .finish()
    }
}
