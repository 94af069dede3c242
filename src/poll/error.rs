//! Errors produced by the polling layer itself.
//!
//! Producer failures are not listed here: they are data, carried inside
//! [`Outcome`](super::Outcome) and [`Snapshot`](super::Snapshot).

use std::time::Duration;

use thiserror::Error;

/// Errors produced by pollers, precachers and streamers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The refresh interval was zero. Raised at construction; nothing is
    /// spawned and the producer is never called.
    #[error("invalid poll interval {interval:?}: must be greater than zero")]
    InvalidInterval { interval: Duration },

    /// No outcome has been received yet.
    #[error("poll: empty cache")]
    CacheEmpty,

    /// Construction happened outside a Tokio runtime.
    #[error("no Tokio runtime available to spawn the poll task")]
    NoRuntime,
}

/// Rejects intervals that would make the ticker spin.
pub(crate) fn check_interval(interval: Duration) -> Result<(), PollError> {
    if interval.is_zero() {
        return Err(PollError::InvalidInterval { interval });
    }
    Ok(())
}
