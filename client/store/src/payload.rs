//! Typed event payloads and the payload interpreter
//!
//! The envelope carries its payload as raw JSON; this module maps
//! (source channel, event kind, payload structure) to a typed payload the
//! reducers can consume. Events whose payload lacks the structurally
//! expected fields for their source interpret to `None` and are dropped by
//! the store without side effects.
//!
//! Two wire quirks are absorbed here: the ticker volume field is accepted
//! under both its canonical (`volume_24h`) and legacy (`24h_volume`)
//! spellings, and both book sides are optional in deltas (a side absent
//! from the payload is untouched).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::event::{Channel, Event, EventKind};
use types::ids::{AccountId, Symbol, TradeId};
use types::numeric::{Amount, Price, Quantity};
use types::order::{OrderRecord, Side};
use types::sequence::TimestampNs;

/// A (price, quantity) pair as transported on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPair(pub Price, pub Quantity);

/// Book snapshot/delta payload: one or both sides of price levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevels {
    pub symbol: Symbol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bids: Option<Vec<LevelPair>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asks: Option<Vec<LevelPair>>,
}

/// Ticker payload: every statistic optional, absent fields untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub symbol: Symbol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_price: Option<Amount>,
    #[serde(default, alias = "24h_volume", skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<Amount>,
}

impl TickerUpdate {
    /// Whether any statistic is present at all.
    fn has_fields(&self) -> bool {
        self.last_price.is_some()
            || self.volume_24h.is_some()
            || self.high_24h.is_some()
            || self.low_24h.is_some()
            || self.mark_price.is_some()
    }
}

/// A single executed trade pushed on the `trades` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<TradeId>,
    pub symbol: Symbol,
    pub price: Price,
    pub quantity: Quantity,
    pub side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimestampNs>,
}

/// One trade inside a tape snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<TradeId>,
    pub price: Price,
    pub quantity: Quantity,
    pub side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimestampNs>,
}

/// Tape snapshot: the recent-trades window for a symbol, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeSnapshot {
    pub symbol: Symbol,
    #[serde(default)]
    pub trades: Vec<TradeItem>,
}

/// Account snapshot: complete balances and open orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshotPayload {
    pub account_id: AccountId,
    #[serde(default)]
    pub balances: BTreeMap<String, Amount>,
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
}

/// Account delta: balance updates merged field-wise, optional order upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDeltaPayload {
    #[serde(default)]
    pub balances: BTreeMap<String, Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderRecord>,
}

/// A fully interpreted event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    BookSnapshot(BookLevels),
    BookDelta(BookLevels),
    Ticker(TickerUpdate),
    Trade(TradePayload),
    TapeSnapshot(TapeSnapshot),
    AccountSnapshot(AccountSnapshotPayload),
    AccountDelta(AccountDeltaPayload),
}

impl Payload {
    /// The symbol this payload addresses, if the stream is per-symbol.
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            Payload::BookSnapshot(p) | Payload::BookDelta(p) => Some(&p.symbol),
            Payload::Ticker(p) => Some(&p.symbol),
            Payload::Trade(p) => Some(&p.symbol),
            Payload::TapeSnapshot(p) => Some(&p.symbol),
            Payload::AccountSnapshot(_) | Payload::AccountDelta(_) => None,
        }
    }
}

/// Interpret an event's raw payload into its typed form.
///
/// Market-data payloads are discriminated structurally: the presence of a
/// `bids` or `asks` key marks a book payload, ticker statistics mark a
/// ticker payload. Returns `None` for anything that does not fit its
/// channel.
pub fn interpret(event: &Event) -> Option<Payload> {
    let value = &event.payload;
    if !value.is_object() {
        return None;
    }
    let looks_like_book = value.get("bids").is_some() || value.get("asks").is_some();

    match (event.source, event.event_type) {
        (Channel::MarketData, EventKind::Snapshot) => {
            if looks_like_book {
                serde_json::from_value(value.clone()).ok().map(Payload::BookSnapshot)
            } else {
                // A ticker snapshot is a wholesale ticker replacement.
                let update: TickerUpdate = serde_json::from_value(value.clone()).ok()?;
                update.has_fields().then_some(Payload::Ticker(update))
            }
        }
        (Channel::MarketData, EventKind::Delta) => {
            if looks_like_book {
                serde_json::from_value(value.clone()).ok().map(Payload::BookDelta)
            } else {
                let update: TickerUpdate = serde_json::from_value(value.clone()).ok()?;
                update.has_fields().then_some(Payload::Ticker(update))
            }
        }
        (Channel::Trades, EventKind::Snapshot) => {
            serde_json::from_value(value.clone()).ok().map(Payload::TapeSnapshot)
        }
        (Channel::Trades, EventKind::Delta) => {
            serde_json::from_value(value.clone()).ok().map(Payload::Trade)
        }
        (Channel::Account, EventKind::Snapshot) => serde_json::from_value(value.clone())
            .ok()
            .map(Payload::AccountSnapshot),
        (Channel::Account, EventKind::Delta) => serde_json::from_value(value.clone())
            .ok()
            .map(Payload::AccountDelta),
    }
}
