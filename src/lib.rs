//! # precache
//!
//! Periodic-refresh caches for slow or rate-limited upstream data: a
//! location lookup, a commit history, the track currently playing.
//!
//! A [`Producer`](poll::Producer) is called on a fixed-rate schedule in a
//! background Tokio task. Its outcomes are either folded into a snapshot
//! that request handlers read without waiting ([`Precacher`]), or delivered
//! as a stream ([`PollStreamer`]) for subscriber-style consumers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use precache::{PollerOptions, Precacher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let commits = Precacher::new(
//!         || async { Ok::<_, std::io::Error>(Some(vec!["fix typo", "bump deps"])) },
//!         Duration::from_secs(600),
//!         PollerOptions::new().immediate(true),
//!     )?;
//!
//!     tokio::time::sleep(Duration::from_millis(10)).await;
//!     let snapshot = commits.results()?;
//!     println!("recent commits: {:?} (error: {:?})", snapshot.value, snapshot.error);
//!
//!     commits.stop();
//!     Ok(())
//! }
//! ```
//!
//! Logging goes through [`tracing`]; wire up a subscriber in the binary to
//! see it.

pub mod config;
pub mod poll;
pub mod stream;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, RefreshConfig};
pub use poll::{
    CacheActor, Outcome, PollError, Poller, PollerOptions, PollerState, Precacher, Producer,
    Snapshot, StreamerOptions,
};
pub use stream::{Broadcaster, OutcomeStream, PollStreamer, Preloader};
