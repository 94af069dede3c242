//! [`Broadcaster`] — fans one outcome stream out to many subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Span, debug, warn};

use crate::poll::runner::{PollerState, TaskHandle};
use crate::poll::{Outcome, PollError, Producer, StreamerOptions};

use super::streamer::{OutcomeStream, PollStreamer};

struct Fanout<V, E> {
    // None once the broadcaster stopped; subscribers then see the end.
    tx: Option<broadcast::Sender<Outcome<V, E>>>,
    latest: Option<Outcome<V, E>>,
}

type Shared<V, E> = Arc<Mutex<Fanout<V, E>>>;

/// Upper bound on a [`Broadcaster`]'s per-subscriber capacity. Larger
/// requests are clamped to it.
pub const MAX_BROADCAST_CAPACITY: usize = 1 << 16;

fn lock<V, E>(shared: &Shared<V, E>) -> MutexGuard<'_, Fanout<V, E>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards every outcome of a stream to all current subscribers, e.g. the
/// "currently playing" track to each open subscription.
///
/// Subscribers see outcomes sent after they subscribed, in tick order. A
/// subscriber that falls more than `capacity` outcomes behind skips the
/// oldest ones.
pub struct Broadcaster<V, E> {
    shared: Shared<V, E>,
    forwarder: TaskHandle,
    streamer: Option<PollStreamer>,
}

impl<V, E> Broadcaster<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Forwards `stream` to subscribers from a background task. `capacity`
    /// is how many outcomes each subscriber may lag behind, clamped to
    /// `1..=`[`MAX_BROADCAST_CAPACITY`].
    ///
    /// # Errors
    ///
    /// [`PollError::NoRuntime`] if called outside a Tokio runtime.
    pub fn new(stream: OutcomeStream<V, E>, capacity: usize, span: Span) -> Result<Self, PollError> {
        let (tx, _) = broadcast::channel(capacity.clamp(1, MAX_BROADCAST_CAPACITY));
        let shared = Arc::new(Mutex::new(Fanout {
            tx: Some(tx),
            latest: None,
        }));
        let forwarder = spawn_forwarder(stream, Arc::clone(&shared), span)?;
        Ok(Self {
            shared,
            forwarder,
            streamer: None,
        })
    }

    /// Polls `producer` every `interval` through an owned [`PollStreamer`]
    /// and broadcasts its outcomes.
    ///
    /// # Errors
    ///
    /// - [`PollError::InvalidInterval`] if `interval` is zero.
    /// - [`PollError::NoRuntime`] if called outside a Tokio runtime.
    pub fn spawn<P>(
        producer: P,
        interval: Duration,
        options: StreamerOptions,
        capacity: usize,
    ) -> Result<Self, PollError>
    where
        P: Producer<Value = V, Error = E>,
    {
        let span = options.poller_options().task_span();
        let (streamer, stream) = PollStreamer::new(producer, interval, options)?;
        let mut broadcaster = Self::new(stream, capacity, span)?;
        broadcaster.streamer = Some(streamer);
        Ok(broadcaster)
    }
}

fn spawn_forwarder<V, E>(
    mut stream: OutcomeStream<V, E>,
    shared: Shared<V, E>,
    span: Span,
) -> Result<TaskHandle, PollError>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    TaskHandle::spawn(span, move |mut shutdown| async move {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                next = stream.next() => match next {
                    Some(outcome) => outcome,
                    None => {
                        debug!("upstream stream ended");
                        break;
                    }
                },
            };

            let mut fanout = lock(&shared);
            if let Some(tx) = &fanout.tx {
                // Err just means nobody is subscribed right now.
                let _ = tx.send(outcome.clone());
            }
            fanout.latest = Some(outcome);
        }
        lock(&shared).tx = None;
    })
}

impl<V, E> Broadcaster<V, E> {
    /// Subscribes to outcomes sent from now on. After the broadcaster
    /// stopped, the returned subscription is already closed.
    pub fn subscribe(&self) -> Subscription<V, E>
    where
        V: Clone,
    {
        let rx = match &lock(&self.shared).tx {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        };
        Subscription { rx }
    }

    /// The most recent outcome forwarded, if any.
    pub fn latest(&self) -> Option<Outcome<V, E>>
    where
        V: Clone,
    {
        lock(&self.shared).latest.clone()
    }

    /// Number of live subscriptions.
    pub fn receiver_count(&self) -> usize {
        lock(&self.shared)
            .tx
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Stops the owned streamer, if any, and the forwarder. Open
    /// subscriptions end once they have read what was already sent.
    pub fn stop(&self) {
        if let Some(streamer) = &self.streamer {
            streamer.stop();
        }
        self.forwarder.stop();
        lock(&self.shared).tx = None;
    }

    /// Stops everything and waits for the background tasks to exit.
    pub async fn shutdown(&self) {
        self.stop();
        if let Some(streamer) = &self.streamer {
            streamer.shutdown().await;
        }
        self.forwarder.shutdown().await;
    }

    /// Lifecycle of the forwarder task.
    pub fn state(&self) -> PollerState {
        self.forwarder.state()
    }
}

impl<V, E> std::fmt::Debug for Broadcaster<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("state", &self.state())
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// One subscriber's view of a [`Broadcaster`].
pub struct Subscription<V, E> {
    rx: broadcast::Receiver<Outcome<V, E>>,
}

impl<V: Clone, E> Subscription<V, E> {
    /// Waits for the next outcome. Outcomes missed by lagging are skipped
    /// (and logged). Returns `None` once the broadcaster stopped and every
    /// outcome already sent has been read.
    pub async fn recv(&mut self) -> Option<Outcome<V, E>> {
        loop {
            match self.rx.recv().await {
                Ok(outcome) => return Some(outcome),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "subscriber lagged behind; skipping outcomes");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl<V, E> std::fmt::Debug for Subscription<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pending", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> impl Fn() -> std::future::Ready<Result<Option<usize>, String>>
    + Send
    + Sync
    + 'static {
        let n = Arc::new(AtomicUsize::new(0));
        move || std::future::ready(Ok::<_, String>(Some(n.fetch_add(1, Ordering::SeqCst))))
    }

    #[tokio::test(start_paused = true)]
    async fn every_subscriber_sees_every_outcome() {
        let bc = Broadcaster::spawn(
            counting(),
            Duration::from_millis(10),
            StreamerOptions::new(),
            8,
        )
        .unwrap();
        let mut a = bc.subscribe();
        let mut b = bc.subscribe();
        assert_eq!(bc.receiver_count(), 2);

        for expected in 0..3 {
            assert_eq!(a.recv().await.and_then(|o| o.value), Some(expected));
            assert_eq!(b.recv().await.and_then(|o| o.value), Some(expected));
        }
        bc.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_primes_from_latest() {
        let bc = Broadcaster::spawn(
            counting(),
            Duration::from_millis(10),
            StreamerOptions::new(),
            8,
        )
        .unwrap();
        assert!(bc.latest().is_none());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(bc.latest().and_then(|o| o.value), Some(1));

        let mut late = bc.subscribe();
        assert_eq!(late.recv().await.and_then(|o| o.value), Some(2));
        bc.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_subscriber_skips_oldest() {
        let bc = Broadcaster::spawn(
            counting(),
            Duration::from_millis(10),
            StreamerOptions::new(),
            2,
        )
        .unwrap();
        let mut slow = bc.subscribe();

        tokio::time::sleep(Duration::from_millis(55)).await;
        // Five sent (0..=4), only the last two retained.
        assert_eq!(slow.recv().await.and_then(|o| o.value), Some(3));
        assert_eq!(slow.recv().await.and_then(|o| o.value), Some(4));
        bc.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_capacity_is_clamped() {
        let bc = Broadcaster::spawn(
            counting(),
            Duration::from_millis(10),
            StreamerOptions::new(),
            usize::MAX,
        )
        .unwrap();
        let mut sub = bc.subscribe();
        assert_eq!(sub.recv().await.and_then(|o| o.value), Some(0));
        bc.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_subscriptions() {
        let bc = Broadcaster::spawn(
            counting(),
            Duration::from_millis(10),
            StreamerOptions::new(),
            8,
        )
        .unwrap();
        let mut sub = bc.subscribe();

        tokio::time::sleep(Duration::from_millis(15)).await;
        bc.shutdown().await;

        assert_eq!(sub.recv().await.and_then(|o| o.value), Some(0));
        assert!(sub.recv().await.is_none());
        assert!(bc.subscribe().recv().await.is_none());
        assert_eq!(bc.receiver_count(), 0);
        assert_eq!(bc.state(), PollerState::Stopped);
    }
}
