//! The canonical event envelope
//!
//! Every non-control frame the server pushes is an `Event`: a uniquely
//! identified, sequenced, timestamped payload on a named channel. The
//! transport parses frames into this envelope and the store consumes it;
//! neither knows about the other.
//!
//! `Ord` is by sequence, so buffered events sort into apply order.

use crate::ids::EventId;
use crate::sequence::{Sequence, TimestampNs};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named class of streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Order book and ticker streams, one per symbol.
    MarketData,
    /// The authenticated account's balances and orders.
    Account,
    /// Public trade tape, one per symbol.
    Trades,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::MarketData => "market_data",
            Channel::Account => "account",
            Channel::Trades => "trades",
        }
    }

    /// Parse a channel name; returns None for unknown channels.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "market_data" => Some(Channel::MarketData),
            "account" => Some(Channel::Account),
            "trades" => Some(Channel::Trades),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event replaces its projection or mutates it incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Complete replacement state for the stream.
    Snapshot,
    /// Incremental mutation.
    Delta,
}

/// A data event pushed by the server.
///
/// The payload stays untyped here; the store interprets it per
/// (source, event_type) and drops events whose payload does not have the
/// structurally expected shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier for duplicate suppression.
    pub event_id: EventId,
    /// Snapshot or delta.
    pub event_type: EventKind,
    /// Stream position, strictly increasing with step 1 per stream.
    pub sequence: Sequence,
    /// Exchange-clock nanosecond timestamp.
    pub timestamp: TimestampNs,
    /// Channel the event originated from.
    pub source: Channel,
    /// Event-specific payload, interpreted downstream.
    pub payload: serde_json::Value,
    /// Opaque server metadata, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Event {
    /// Whether this event is a snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.event_type == EventKind::Snapshot
    }
}

/// Ordering by sequence for deterministic buffered replay.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Event {}
