//! Session controller
//!
//! Owns exactly one transport client and one state store and wires them
//! together: transport events flow into `Store::dispatch`, store recovery
//! requests flow back out as `snapshot_since` frames. Neither component
//! references the other; the session is the only place the two meet.

pub mod config;
pub mod session;

pub use config::SessionConfig;
pub use session::Session;
