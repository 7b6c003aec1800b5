//! Client sync agent — a locally queryable mirror of seat availability.
//!
//! DESIGN
//! ======
//! [`state`] is the pure reducer over SNAPSHOT, DELTA, channel loss and
//! HTTP pulls. [`runtime`] owns the websocket, reconnect back-off and the
//! pull fallback, and publishes each new [`SyncState`] on a watch channel.

pub mod state;

mod runtime;

pub use runtime::{AgentConfig, AgentError, Backoff, SyncHandle, spawn, ws_url};
pub use state::{ApplyOutcome, SpaceFilter, SpaceSet, SyncEvent, SyncState};
