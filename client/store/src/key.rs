//! Domain keys partitioning sequence tracking and delta buffers
//!
//! The server sequences each logical stream independently: one stream per
//! (channel, symbol) for market data and trades, one stream for the
//! authenticated account. Cursors and buffers are partitioned by this key so
//! unrelated streams never interfere.

use crate::payload::Payload;
use std::fmt;
use types::event::Channel;
use types::ids::Symbol;

/// Identifies one server-side logical stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DomainKey {
    /// `"<channel>::<symbol>"` streams: market data and trades.
    Market { channel: Channel, symbol: Symbol },
    /// The single `"account"` stream.
    Account,
}

impl DomainKey {
    /// Derive the key for an interpreted event.
    pub fn for_payload(channel: Channel, payload: &Payload) -> DomainKey {
        match payload.symbol() {
            Some(symbol) => DomainKey::Market {
                channel,
                symbol: symbol.clone(),
            },
            None => DomainKey::Account,
        }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainKey::Market { channel, symbol } => write!(f, "{}::{}", channel, symbol),
            DomainKey::Account => f.write_str("account"),
        }
    }
}
