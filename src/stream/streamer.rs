//! [`PollStreamer`] — the poll loop, exposed as a stream of outcomes.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::poll::runner::{PollerState, Sink, TaskHandle, spawn_periodic};
use crate::poll::{Outcome, PollError, Producer, StreamerOptions};

struct ChannelSink<V, E>(mpsc::Sender<Outcome<V, E>>);

impl<V, E> Sink<V, E> for ChannelSink<V, E>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
{
    async fn deliver(&mut self, outcome: Outcome<V, E>) -> bool {
        // Err only when the consumer dropped its stream.
        self.0.send(outcome).await.is_ok()
    }

    async fn closed(&self) {
        self.0.closed().await;
    }
}

/// Polls a [`Producer`] on a schedule and streams every outcome to a single
/// consumer.
///
/// The stream ends after [`stop`](Self::stop), or when the `PollStreamer` is
/// dropped, once already-buffered outcomes have been read. Dropping or
/// closing the [`OutcomeStream`] stops the schedule too, without another
/// produce call.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use precache::poll::StreamerOptions;
/// use precache::stream::PollStreamer;
///
/// # #[tokio::main] async fn main() {
/// let (streamer, mut outcomes) = PollStreamer::new(
///     || async { Ok::<_, String>(Some("now playing")) },
///     Duration::from_millis(10),
///     StreamerOptions::new(),
/// )
/// .unwrap();
///
/// let first = outcomes.next().await.unwrap();
/// assert_eq!(first.value, Some("now playing"));
/// streamer.stop();
/// # }
/// ```
pub struct PollStreamer {
    task: TaskHandle,
}

impl PollStreamer {
    /// Starts polling `producer` every `interval`.
    ///
    /// Returns the streamer, which controls the schedule, and the stream its
    /// outcomes are delivered to. When the consumer falls
    /// [`buffer`](StreamerOptions::buffer) outcomes behind, the schedule
    /// waits for it and skips the ticks it misses meanwhile.
    ///
    /// # Errors
    ///
    /// - [`PollError::InvalidInterval`] if `interval` is zero.
    /// - [`PollError::NoRuntime`] if called outside a Tokio runtime.
    #[allow(clippy::type_complexity)]
    pub fn new<P>(
        producer: P,
        interval: Duration,
        options: StreamerOptions,
    ) -> Result<(Self, OutcomeStream<P::Value, P::Error>), PollError>
    where
        P: Producer,
    {
        let (tx, rx) = mpsc::channel(options.buffer_size());
        let task = spawn_periodic(
            producer,
            interval,
            ChannelSink(tx),
            options.poller_options(),
        )?;
        Ok((Self { task }, OutcomeStream { rx }))
    }

    /// Stops the schedule. Idempotent and non-blocking; the stream ends once
    /// drained.
    pub fn stop(&self) {
        self.task.stop();
    }

    /// Stops the schedule and waits for the poll task to exit.
    pub async fn shutdown(&self) {
        self.task.shutdown().await;
    }

    pub fn state(&self) -> PollerState {
        self.task.state()
    }
}

impl std::fmt::Debug for PollStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollStreamer")
            .field("state", &self.state())
            .finish()
    }
}

/// The consumer side of a [`PollStreamer`].
///
/// Yields outcomes in tick order. Also usable through
/// [`tokio_stream::StreamExt`].
pub struct OutcomeStream<V, E> {
    rx: mpsc::Receiver<Outcome<V, E>>,
}

impl<V, E> OutcomeStream<V, E> {
    /// Waits for the next outcome. Returns `None` once the streamer stopped
    /// and every buffered outcome has been read.
    pub async fn next(&mut self) -> Option<Outcome<V, E>> {
        self.rx.recv().await
    }

    /// Stops accepting outcomes, which ends the streamer's schedule. Already
    /// buffered outcomes can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<V, E> std::fmt::Debug for OutcomeStream<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeStream")
            .field("buffered", &self.rx.len())
            .finish()
    }
}

impl<V, E> Stream for OutcomeStream<V, E> {
    type Item = Outcome<V, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    fn counter() -> (
        Arc<AtomicUsize>,
        impl Fn() -> std::future::Ready<Result<Option<usize>, String>> + Send + Sync + 'static,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let producer =
            move || std::future::ready(Ok::<_, String>(Some(c.fetch_add(1, Ordering::SeqCst))));
        (calls, producer)
    }

    #[tokio::test(start_paused = true)]
    async fn yields_in_tick_order() {
        let (_, producer) = counter();
        let (streamer, stream) =
            PollStreamer::new(producer, Duration::from_millis(10), StreamerOptions::new())
                .unwrap();

        let values: Vec<_> = stream.take(3).map(|o| o.value).collect().await;
        assert_eq!(values, vec![Some(0), Some(1), Some(2)]);
        streamer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_stream_after_drain() {
        let (_, producer) = counter();
        let (streamer, mut stream) =
            PollStreamer::new(producer, Duration::from_millis(10), StreamerOptions::new())
                .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        streamer.shutdown().await;

        assert_eq!(stream.next().await.and_then(|o| o.value), Some(0));
        assert_eq!(stream.next().await.and_then(|o| o.value), Some(1));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stream_stops_polling() {
        let (calls, producer) = counter();
        let (streamer, stream) =
            PollStreamer::new(producer, Duration::from_millis(10), StreamerOptions::new())
                .unwrap();
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(streamer.state(), PollerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_stream_skips_next_produce() {
        let (calls, producer) = counter();
        let (streamer, mut stream) =
            PollStreamer::new(producer, Duration::from_millis(10), StreamerOptions::new())
                .unwrap();

        assert_eq!(stream.next().await.and_then(|o| o.value), Some(0));
        stream.close();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(streamer.state(), PollerState::Stopped);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_skips_ticks() {
        let (calls, producer) = counter();
        let (streamer, mut stream) = PollStreamer::new(
            producer,
            Duration::from_millis(10),
            StreamerOptions::new().buffer(1),
        )
        .unwrap();

        // One buffered, one blocked in send; everything else is skipped.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(stream.next().await.and_then(|o| o.value), Some(0));
        assert_eq!(stream.next().await.and_then(|o| o.value), Some(1));
        streamer.stop();
    }

    #[tokio::test]
    async fn zero_interval_rejected() {
        let (calls, producer) = counter();
        let err = PollStreamer::new(producer, Duration::ZERO, StreamerOptions::new()).unwrap_err();
        assert!(matches!(err, PollError::InvalidInterval { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
