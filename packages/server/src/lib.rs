//! Broadcast server for the kakehashi real-time bridge.
//!
//! Bridges a static analytics backend (plain HTTP, polled on a timer) to
//! connected browsers (WebSocket, room-based fan-out). Nothing is persisted
//! and nothing is replayed: a client sees updates published while it is
//! subscribed, and must treat its local snapshot as possibly stale after a
//! reconnect.

pub mod config;
pub mod diff;
pub mod fetch;
pub mod handler;
pub mod hub;
pub mod poller;
pub mod runner;
pub mod signal;
pub mod state;
