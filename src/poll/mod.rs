//! Periodic refresh: producers, pollers, and the precaching snapshot cache.
//!
//! ## Core types
//!
//! - [`Producer`] — the upstream capability being refreshed.
//! - [`Outcome`] — the value/error pair produced by one tick.
//! - [`Poller`] — calls a producer on a fixed-rate schedule and hands each
//!   outcome to a [`Recv`] callback.
//! - [`CacheActor`] — folds outcomes into a [`Snapshot`] of the last good
//!   value and the latest error.
//! - [`Precacher`] — a poller wired into a cache actor, read with
//!   [`Precacher::results`].
//!
//! Scheduling is fixed-rate: ticks fall at `t0 + n * interval`, and ticks
//! that come due while a produce call is still running are skipped rather
//! than queued. The only error of this layer a reader ever sees is
//! [`PollError::CacheEmpty`]; producer failures are data, reported in the
//! snapshot next to the retained value.

mod cache;
mod error;
mod options;
mod poller;
mod precacher;
mod producer;
pub(crate) mod runner;

pub use cache::{CacheActor, Snapshot};
pub use error::PollError;
pub use options::{DEFAULT_STREAM_BUFFER, PollerOptions, StreamerOptions};
pub use poller::{Poller, Recv};
pub use precacher::Precacher;
pub use producer::{Outcome, Producer};
pub use runner::PollerState;
