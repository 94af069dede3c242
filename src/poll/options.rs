//! Construction options shared by pollers, precachers and streamers.

use tracing::Span;

/// Options controlling how a poll task is scheduled and observed.
///
/// The default is the quiet configuration: no span (the no-op
/// [`Span::none`]) and a first tick one interval after construction.
///
/// # Examples
///
/// ```rust
/// use precache::poll::PollerOptions;
///
/// let opts = PollerOptions::new()
///     .span(tracing::info_span!("poll", source = "location"))
///     .immediate(true);
/// assert!(opts.is_immediate());
/// ```
#[derive(Debug, Clone)]
pub struct PollerOptions {
    span: Span,
    immediate: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            span: Span::none(),
            immediate: false,
        }
    }
}

impl PollerOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instruments the poll task with `span`, so every event it emits is
    /// recorded inside it.
    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Fires the first tick at construction instead of one interval later.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Returns whether the first tick fires at construction.
    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub(crate) fn task_span(&self) -> Span {
        self.span.clone()
    }
}

/// Default number of outcomes a [`PollStreamer`](crate::stream::PollStreamer)
/// buffers ahead of its consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Options for a [`PollStreamer`](crate::stream::PollStreamer).
#[derive(Debug, Clone)]
pub struct StreamerOptions {
    poller: PollerOptions,
    buffer: usize,
}

impl Default for StreamerOptions {
    fn default() -> Self {
        Self {
            poller: PollerOptions::default(),
            buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl StreamerOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the scheduling options.
    pub fn poller(mut self, poller: PollerOptions) -> Self {
        self.poller = poller;
        self
    }

    /// Sets how many outcomes may wait for the consumer. Clamped to at
    /// least one.
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// The options the underlying poll schedule runs with.
    pub fn poller_options(&self) -> &PollerOptions {
        &self.poller
    }

    /// How many outcomes may wait for the consumer before the schedule
    /// blocks. Never zero.
    pub fn buffer_size(&self) -> usize {
        self.buffer
    }
}

impl From<PollerOptions> for StreamerOptions {
    fn from(poller: PollerOptions) -> Self {
        Self::default().poller(poller)
    }
}
