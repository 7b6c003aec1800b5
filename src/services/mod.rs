//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `registry` owns seat counts and the state version. `booking` is the only
//! caller that mutates seats on behalf of users. `hub` consumes the registry
//! change stream and fans it out to live connections. `store` and
//! `persistence` keep bookings and seat counts durable. `favorites` keeps
//! per-user shortlists and reads seat counts without changing them.

pub mod booking;
pub mod favorites;
pub mod hub;
pub mod persistence;
pub mod registry;
pub mod store;
