//! Ticker projection and merge reducer
//!
//! Ticker updates are sparse: only changed statistics are sent. The reducer
//! overlays present fields on the prior ticker; with no prior ticker, absent
//! fields default to zero.

use crate::payload::TickerUpdate;
use serde::{Deserialize, Serialize};
use types::ids::Symbol;
use types::numeric::Amount;
use types::sequence::Sequence;

/// 24-hour market statistics for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub last_price: Amount,
    pub volume_24h: Amount,
    pub high_24h: Amount,
    pub low_24h: Amount,
    pub mark_price: Amount,
    /// Sequence of the last applied event.
    pub last_seq: Sequence,
}

/// Merge an update over the prior ticker (zeroes when there is none).
pub fn apply_update(prior: Option<&Ticker>, update: &TickerUpdate, sequence: Sequence) -> Ticker {
    let base = |field: fn(&Ticker) -> Amount| prior.map(field).unwrap_or_default();

    Ticker {
        symbol: update.symbol.clone(),
        last_price: update.last_price.unwrap_or_else(|| base(|t| t.last_price)),
        volume_24h: update.volume_24h.unwrap_or_else(|| base(|t| t.volume_24h)),
        high_24h: update.high_24h.unwrap_or_else(|| base(|t| t.high_24h)),
        low_24h: update.low_24h.unwrap_or_else(|| base(|t| t.low_24h)),
        mark_price: update.mark_price.unwrap_or_else(|| base(|t| t.mark_price)),
        last_seq: sequence,
    }
}
