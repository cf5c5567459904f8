//! Bounded public trade tape
//!
//! Keeps the most recent trades per symbol in arrival order, evicting
//! oldest-first once the configured cap is reached.

use crate::payload::{TapeSnapshot, TradePayload};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use types::ids::{EventId, Symbol, TradeId};
use types::numeric::{Price, Quantity};
use types::order::Side;
use types::sequence::TimestampNs;

/// A single trade on the tape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: TradeId,
    pub price: Price,
    pub quantity: Quantity,
    /// Taker side.
    pub side: Side,
    pub timestamp: TimestampNs,
}

/// Recent trades for one symbol, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTape {
    pub symbol: Symbol,
    trades: VecDeque<TradeRecord>,
}

impl TradeTape {
    pub fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            trades: VecDeque::new(),
        }
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter()
    }

    pub fn latest(&self) -> Option<&TradeRecord> {
        self.trades.back()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

/// Append one trade, evicting oldest entries past the cap.
pub fn apply_trade(
    tape: &TradeTape,
    event_id: &EventId,
    event_timestamp: TimestampNs,
    payload: &TradePayload,
    max_len: usize,
) -> TradeTape {
    let mut trades = tape.trades.clone();
    trades.push_back(TradeRecord {
        trade_id: record_id(payload.trade_id.as_ref(), event_id),
        price: payload.price,
        quantity: payload.quantity,
        side: payload.side,
        timestamp: payload.timestamp.unwrap_or(event_timestamp),
    });
    while trades.len() > max_len {
        trades.pop_front();
    }

    TradeTape {
        symbol: tape.symbol.clone(),
        trades,
    }
}

/// Replace the tape wholesale from a snapshot, keeping at most the cap's
/// newest entries.
pub fn apply_snapshot(
    event_id: &EventId,
    event_timestamp: TimestampNs,
    payload: &TapeSnapshot,
    max_len: usize,
) -> TradeTape {
    let mut trades: VecDeque<TradeRecord> = payload
        .trades
        .iter()
        .enumerate()
        .map(|(i, item)| TradeRecord {
            trade_id: item
                .trade_id
                .clone()
                .unwrap_or_else(|| TradeId::new(format!("{}#{}", event_id, i))),
            price: item.price,
            quantity: item.quantity,
            side: item.side,
            timestamp: item.timestamp.unwrap_or(event_timestamp),
        })
        .collect();
    while trades.len() > max_len {
        trades.pop_front();
    }

    TradeTape {
        symbol: payload.symbol.clone(),
        trades,
    }
}

fn record_id(trade_id: Option<&TradeId>, event_id: &EventId) -> TradeId {
    match trade_id {
        Some(id) => id.clone(),
        None => TradeId::new(event_id.as_str()),
    }
}
