//! Reconnecting WebSocket transport client
//!
//! Connects to the exchange's streaming endpoint, authenticates with a
//! caller-supplied token provider, subscribes to named channels, polices
//! server heartbeats, and reconnects with jittered exponential backoff. Per
//! subscription it tracks the highest observed sequence so a reconnect can
//! ask the server to replay exactly the events missed during the outage
//! (`snapshot_since`).
//!
//! The protocol logic lives in a sans-IO state machine (`core`); the tokio
//! driver (`client`) only moves bytes and timers. Events are handed to
//! per-channel observers; the transport holds no reference to the store.
//!
//! ```text
//! socket ──► parse_frame ──► ConnectionCore ──► actions ──► socket / observers
//! ```

pub mod backoff;
pub mod client;
pub mod core;
pub mod error;
pub mod heartbeat;
pub mod metrics;
pub mod protocol;
pub mod subscription;

pub use client::{StaticToken, TokenFuture, TokenProvider, TransportConfig, WsClient};
pub use error::{SubscribeError, TransportError};
pub use protocol::Params;
