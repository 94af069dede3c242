//! Stoppable background tasks and the periodic produce loop built on them.
//!
//! Every background task in the crate (poll loops, the preloader's
//! consumer, the broadcaster's forwarder) is spawned through
//! [`TaskHandle::spawn`], which gives it one stop signal and one observable
//! lifecycle. [`spawn_periodic`] is the tick/skip/cancel loop shared by
//! [`Poller`](super::Poller) and [`PollStreamer`](crate::stream::PollStreamer);
//! the two differ only in their [`Sink`].

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, Span, debug, error, trace, warn};

use super::error::{PollError, check_interval};
use super::options::PollerOptions;
use super::producer::{Outcome, Producer};

/// Lifecycle of a background poll task.
///
/// `Created → Running → Stopped`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Spawned, but the task has not started executing yet.
    Created,
    /// The task is scheduling ticks.
    Running,
    /// Stop was requested or the task exited. No further ticks start.
    Stopped,
}

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

impl PollerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            CREATED => Self::Created,
            RUNNING => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// The stop signal handed to a background task.
pub(crate) struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once stop was requested or the owning handle was dropped.
    ///
    /// Checks the current value first, so it is safe to recreate on every
    /// loop iteration inside `select!`.
    pub(crate) async fn requested(&mut self) {
        // Err means the handle is gone, which also means stop.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Non-blocking check of the stop flag.
    pub(crate) fn is_requested(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

/// Owner side of a background task: stop signal, lifecycle, join handle.
///
/// Dropping the handle stops the task.
pub(crate) struct TaskHandle {
    stop: watch::Sender<bool>,
    state: Arc<AtomicU8>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    /// Spawns `task` on the current Tokio runtime, instrumented with `span`.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::NoRuntime`] when called outside a runtime.
    pub(crate) fn spawn<F, Fut>(span: Span, task: F) -> Result<Self, PollError>
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| PollError::NoRuntime)?;
        let (stop, rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(CREATED));

        let fut = task(Shutdown { rx });
        let task_state = Arc::clone(&state);
        let join = runtime.spawn(
            async move {
                // A stop that lands before the first poll must stay terminal.
                let _ = task_state.compare_exchange(
                    CREATED,
                    RUNNING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                fut.await;
                task_state.store(STOPPED, Ordering::Release);
            }
            .instrument(span),
        );

        Ok(Self {
            stop,
            state,
            task: Mutex::new(Some(join)),
        })
    }

    /// Requests the task to stop. Idempotent and non-blocking.
    pub(crate) fn stop(&self) {
        self.state.store(STOPPED, Ordering::Release);
        self.stop.send_replace(true);
    }

    pub(crate) fn state(&self) -> PollerState {
        PollerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stops the task and waits for it to exit.
    pub(crate) async fn shutdown(&self) {
        self.stop();
        let join = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    }
}

/// Where a periodic task forwards its outcomes.
pub(crate) trait Sink<V, E>: Send + 'static {
    /// Delivers one outcome. Returns `false` once the sink can accept no
    /// more, which ends the task.
    fn deliver(&mut self, outcome: Outcome<V, E>) -> impl Future<Output = bool> + Send;

    /// Resolves once the sink will accept no more outcomes, so the task can
    /// end without producing one nobody reads. Never resolves by default.
    fn closed(&self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }
}

/// Where the schedule starts when it does not fire at construction. An
/// interval too large to add to now starts it in the far future instead.
fn first_tick(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

/// Spawns the produce loop: one `produce` call per tick, forwarded to `sink`.
///
/// Ticks fire at `start + n * interval`, where `start` is now (when
/// [`PollerOptions::immediate`] is set) or one interval from now. Every tick
/// that falls due while a produce call or a delivery is still running is
/// skipped, never queued: the next produce happens on the next scheduled
/// tick after the slow call returns.
///
/// # Errors
///
/// [`PollError::InvalidInterval`] for a zero interval (checked before
/// anything is spawned) and [`PollError::NoRuntime`] outside a runtime.
pub(crate) fn spawn_periodic<P, S>(
    producer: P,
    interval: Duration,
    sink: S,
    options: &PollerOptions,
) -> Result<TaskHandle, PollError>
where
    P: Producer,
    S: Sink<P::Value, P::Error>,
{
    check_interval(interval)?;

    let now = Instant::now();
    let start = if options.is_immediate() {
        now
    } else {
        first_tick(now, interval)
    };

    TaskHandle::spawn(options.task_span(), move |shutdown| {
        run_periodic(producer, start, interval, sink, shutdown)
    })
}

async fn run_periodic<P, S>(
    producer: P,
    start: Instant,
    interval: Duration,
    mut sink: S,
    mut shutdown: Shutdown,
) where
    P: Producer,
    S: Sink<P::Value, P::Error>,
{
    let mut ticker = interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(interval_ms = interval.as_millis() as u64, "poll task started");

    let mut tick: u64 = 0;
    let mut skipped: u64 = 0;
    // When the previous produce and delivery finished.
    let mut busy_until: Option<Instant> = None;
    loop {
        let scheduled = tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            _ = sink.closed() => {
                debug!(tick, "sink closed");
                break;
            }
            scheduled = ticker.tick() => scheduled,
        };
        // Tokio hands out one late tick after an overrun; drop it so the
        // schedule resumes on the next multiple of the interval.
        if busy_until.is_some_and(|done| scheduled < done) {
            skipped += 1;
            trace!(skipped, "tick fell due during the previous produce; skipped");
            continue;
        }
        // select! builds every branch before polling any, so check first:
        // a closure producer runs its synchronous part on construction.
        if shutdown.is_requested() {
            break;
        }
        tick += 1;
        trace!(tick, "producing");

        let outcome = tokio::select! {
            biased;
            _ = shutdown.requested() => {
                debug!(tick, "stopped during produce; outcome dropped");
                break;
            }
            _ = sink.closed() => {
                debug!(tick, "sink closed during produce; outcome dropped");
                break;
            }
            outcome = producer.produce() => outcome,
        };

        match &outcome.error {
            Some(err) => error!(
                tick,
                error = %err,
                has_value = outcome.value.is_some(),
                "producer returned an error"
            ),
            None => trace!(tick, has_value = outcome.value.is_some(), "producer returned"),
        }

        let delivered = tokio::select! {
            biased;
            _ = shutdown.requested() => break,
            delivered = sink.deliver(outcome) => delivered,
        };
        if !delivered {
            debug!(tick, "sink closed");
            break;
        }
        busy_until = Some(Instant::now());
    }

    debug!(ticks = tick, skipped, "poll task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct VecSink(Arc<Mutex<Vec<Option<u32>>>>);

    impl Sink<u32, String> for VecSink {
        async fn deliver(&mut self, outcome: Outcome<u32, String>) -> bool {
            self.0.lock().unwrap().push(outcome.value);
            true
        }
    }

    struct ClosingSink(usize);

    impl Sink<u32, String> for ClosingSink {
        async fn deliver(&mut self, _outcome: Outcome<u32, String>) -> bool {
            self.0 -= 1;
            self.0 > 0
        }
    }

    fn counting_producer(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> std::future::Ready<Result<Option<u32>, String>> + Send + Sync + 'static
    {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) as u32;
            std::future::ready(Ok::<_, String>(Some(n)))
        }
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = VecSink(Arc::default());
        let result = spawn_periodic(
            counting_producer(calls.clone()),
            Duration::from_millis(10),
            sink,
            &PollerOptions::default(),
        );
        assert!(matches!(result, Err(PollError::NoRuntime)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_tick_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_periodic(
            counting_producer(calls),
            Duration::from_millis(100),
            VecSink(seen.clone()),
            &PollerOptions::default(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.shutdown().await;

        assert_eq!(*seen.lock().unwrap(), vec![Some(0), Some(1), Some(2)]);
        assert_eq!(handle.state(), PollerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_fires_at_start() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            counting_producer(calls.clone()),
            Duration::from_millis(100),
            VecSink(Arc::default()),
            &PollerOptions::new().immediate(true),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_sink_ends_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            counting_producer(calls.clone()),
            Duration::from_millis(10),
            ClosingSink(2),
            &PollerOptions::default(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state(), PollerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_poll_is_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            counting_producer(calls.clone()),
            Duration::from_millis(10),
            VecSink(Arc::default()),
            &PollerOptions::new().immediate(true),
        )
        .unwrap();
        handle.stop();
        handle.stop();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.state(), PollerState::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_interval_starts_without_overflow() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            counting_producer(calls.clone()),
            Duration::MAX,
            VecSink(Arc::default()),
            &PollerOptions::default(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), PollerState::Running);
        handle.shutdown().await;
        assert_eq!(handle.state(), PollerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_interval_immediate_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            counting_producer(calls.clone()),
            Duration::MAX,
            VecSink(Arc::default()),
            &PollerOptions::new().immediate(true),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.stop();
    }

    #[test]
    fn first_tick_saturates_to_far_future() {
        let now = Instant::now();
        assert_eq!(
            first_tick(now, Duration::from_millis(100)),
            now + Duration::from_millis(100)
        );
        assert!(first_tick(now, Duration::MAX) > now + Duration::from_secs(86400 * 365));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(
            counting_producer(calls.clone()),
            Duration::from_millis(10),
            VecSink(Arc::default()),
            &PollerOptions::default(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        drop(handle);
        let before = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }
}
