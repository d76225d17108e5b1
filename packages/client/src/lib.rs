//! Client library for the kakehashi real-time bridge.
//!
//! Provides a reconnecting WebSocket connection manager
//! ([`manager::RealtimeClient`]) and a snapshot store
//! ([`store::RealtimeStore`]) that UI layers read through selectors. Both
//! are explicitly constructed and injected rather than process-global, so
//! tests never leak state into each other.

pub mod config;
pub mod error;
pub mod formatter;
pub mod manager;
mod session;
pub mod store;
