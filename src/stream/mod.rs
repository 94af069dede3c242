//! Stream consumption of poll outcomes.
//!
//! - [`PollStreamer`] — the same fixed-rate loop as
//!   [`Poller`](crate::poll::Poller), with outcomes delivered to one
//!   [`OutcomeStream`] instead of a callback.
//! - [`Preloader`] — drains a stream into a readable cache.
//! - [`Broadcaster`] — fans a stream out to any number of [`Subscription`]s.

mod broadcast;
mod preload;
mod streamer;

pub use broadcast::{Broadcaster, MAX_BROADCAST_CAPACITY, Subscription};
pub use preload::Preloader;
pub use streamer::{OutcomeStream, PollStreamer};
