//! [`Poller`] — drives a [`Producer`] on a fixed-rate schedule and hands
//! every outcome to a synchronous [`Recv`] callback.

use std::sync::Arc;
use std::time::Duration;

use super::error::PollError;
use super::options::PollerOptions;
use super::producer::{Outcome, Producer};
use super::runner::{PollerState, Sink, TaskHandle, spawn_periodic};

/// Receives the outcomes of a [`Poller`].
///
/// `recv` is called from the poll task only, one outcome at a time and in
/// tick order; it is never invoked concurrently with itself. It should
/// return quickly, since ticks that fall due while it runs are skipped.
///
/// Plain closures implement `Recv`:
///
/// ```rust
/// use precache::poll::{Outcome, Recv};
///
/// fn assert_recv<R: Recv<u32, String>>(_: &R) {}
/// assert_recv(&|outcome: Outcome<u32, String>| println!("{:?}", outcome.value));
/// ```
pub trait Recv<V, E>: Send + Sync + 'static {
    fn recv(&self, outcome: Outcome<V, E>);
}

impl<V, E, F> Recv<V, E> for F
where
    F: Fn(Outcome<V, E>) + Send + Sync + 'static,
{
    fn recv(&self, outcome: Outcome<V, E>) {
        self(outcome)
    }
}

struct RecvSink<R>(Arc<R>);

impl<V, E, R> Sink<V, E> for RecvSink<R>
where
    V: Send + 'static,
    E: Send + Sync + 'static,
    R: Recv<V, E>,
{
    async fn deliver(&mut self, outcome: Outcome<V, E>) -> bool {
        self.0.recv(outcome);
        true
    }
}

/// Calls a [`Producer`] once per interval until stopped.
///
/// Construction starts the schedule; there is no separate start call. The
/// producer is never called concurrently with itself, and outcomes reach
/// the receiver in tick order. Dropping a `Poller` stops it.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use precache::poll::{Outcome, Poller, PollerOptions};
/// use std::sync::Arc;
///
/// # #[tokio::main] async fn main() -> Result<(), precache::poll::PollError> {
/// let producer = || async { Ok::<_, String>(Some(42)) };
/// let receiver = Arc::new(|outcome: Outcome<i32, String>| {
///     println!("got {:?}", outcome.value);
/// });
/// let poller = Poller::new(producer, Duration::from_secs(1), receiver, PollerOptions::new())?;
/// poller.stop();
/// # Ok(()) }
/// ```
pub struct Poller {
    task: TaskHandle,
}

impl Poller {
    /// Starts polling `producer` every `interval`, delivering to `receiver`.
    ///
    /// # Errors
    ///
    /// - [`PollError::InvalidInterval`] if `interval` is zero.
    /// - [`PollError::NoRuntime`] if called outside a Tokio runtime.
    pub fn new<P, R>(
        producer: P,
        interval: Duration,
        receiver: Arc<R>,
        options: PollerOptions,
    ) -> Result<Self, PollError>
    where
        P: Producer,
        R: Recv<P::Value, P::Error>,
    {
        let task = spawn_periodic(producer, interval, RecvSink(receiver), &options)?;
        Ok(Self { task })
    }

    /// Stops the schedule. Idempotent, non-blocking, callable from any
    /// thread. Once it returns, no further produce call starts; a call in
    /// flight is cancelled and its outcome discarded.
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

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller").field("state", &self.state()).finish()
    }
}
