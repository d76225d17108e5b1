//! Shared library for the kakehashi real-time broadcast bridge.
//!
//! Holds the wire protocol spoken between the broadcast server and its
//! clients, plus the time and logging utilities both sides use.

pub mod logger;
pub mod protocol;
pub mod time;
