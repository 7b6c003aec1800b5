//! Client library for the seat availability service: a REST client and the
//! live sync agent. The `calm` binary is a thin shell over both.

pub mod agent;
pub mod api;
