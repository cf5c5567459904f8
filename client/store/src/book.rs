//! Order book projection and reducers
//!
//! Mirrors one symbol's book from snapshot and delta events. Levels are kept
//! unique per price and sorted for display: bids descending (best first),
//! asks ascending (best first). A delta level with quantity "0" removes that
//! price. Reduction goes through a `BTreeMap` keyed by the numeric price so
//! ordering and uniqueness are structural, not re-checked.
//!
//! Reducers are pure: they take the current projection by reference and
//! return a fresh one.

use crate::payload::{BookLevels, LevelPair};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use types::ids::Symbol;
use types::numeric::{Price, Quantity};
use types::sequence::Sequence;

/// A single price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

/// The book projection for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderbook {
    pub symbol: Symbol,
    /// Descending by price: best bid first.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price: best ask first.
    pub asks: Vec<PriceLevel>,
    /// Sequence of the last applied event.
    pub last_seq: Sequence,
}

impl Orderbook {
    /// An empty book at cursor zero.
    pub fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: Vec::new(),
            asks: Vec::new(),
            last_seq: Sequence::ZERO,
        }
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Deterministic content hash of the book, for cross-checking a
    /// replayed stream against a fresh snapshot of the same sequence.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for level in &self.bids {
            hasher.update(level.price.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(level.quantity.to_string().as_bytes());
            hasher.update(b"|");
        }
        hasher.update(b"---");
        for level in &self.asks {
            hasher.update(level.price.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(level.quantity.to_string().as_bytes());
            hasher.update(b"|");
        }
        hasher.update(b"---");
        hasher.update(self.last_seq.value().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Build a book from a snapshot payload.
///
/// Sides are sorted into display order; duplicate prices collapse (last
/// entry wins) and zero-quantity levels are dropped, so the snapshot path
/// upholds the same level invariants as the delta path.
pub fn apply_snapshot(payload: &BookLevels, sequence: Sequence) -> Orderbook {
    let bids = reduce_side(&[], payload.bids.as_deref().unwrap_or(&[]));
    let asks = reduce_side(&[], payload.asks.as_deref().unwrap_or(&[]));

    Orderbook {
        symbol: payload.symbol.clone(),
        bids: collect_descending(bids),
        asks: collect_ascending(asks),
        last_seq: sequence,
    }
}

/// Apply a delta payload to an existing book.
///
/// Only the sides present in the payload change; within a side, a zero
/// quantity removes the price and any other quantity inserts or replaces it.
pub fn apply_delta(book: &Orderbook, payload: &BookLevels, sequence: Sequence) -> Orderbook {
    let bids = match payload.bids.as_deref() {
        Some(updates) => collect_descending(reduce_side(&book.bids, updates)),
        None => book.bids.clone(),
    };
    let asks = match payload.asks.as_deref() {
        Some(updates) => collect_ascending(reduce_side(&book.asks, updates)),
        None => book.asks.clone(),
    };

    Orderbook {
        symbol: book.symbol.clone(),
        bids,
        asks,
        last_seq: sequence,
    }
}

/// Fold one side's updates over its current levels into a price-keyed map.
fn reduce_side(current: &[PriceLevel], updates: &[LevelPair]) -> BTreeMap<Decimal, PriceLevel> {
    let mut levels: BTreeMap<Decimal, PriceLevel> = current
        .iter()
        .map(|level| (level.price.as_decimal(), level.clone()))
        .collect();

    for LevelPair(price, quantity) in updates {
        if quantity.is_zero() {
            levels.remove(&price.as_decimal());
        } else {
            levels.insert(
                price.as_decimal(),
                PriceLevel {
                    price: *price,
                    quantity: *quantity,
                },
            );
        }
    }

    levels
}

fn collect_ascending(levels: BTreeMap<Decimal, PriceLevel>) -> Vec<PriceLevel> {
    levels.into_values().collect()
}

fn collect_descending(levels: BTreeMap<Decimal, PriceLevel>) -> Vec<PriceLevel> {
    levels.into_values().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(symbol: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> BookLevels {
        BookLevels {
            symbol: Symbol::new(symbol),
            bids: Some(
                bids.iter()
                    .map(|(p, q)| LevelPair(p.parse().unwrap(), q.parse().unwrap()))
                    .collect(),
            ),
            asks: Some(
                asks.iter()
                    .map(|(p, q)| LevelPair(p.parse().unwrap(), q.parse().unwrap()))
                    .collect(),
            ),
        }
    }

    #[test]
    fn test_snapshot_sorts_sides() {
        let payload = levels(
            "BTC_USD",
            &[("49900", "2"), ("50000", "1.5")],
            &[("50200", "1"), ("50100", "0.7")],
        );
        let book = apply_snapshot(&payload, Sequence::new(100));

        assert_eq!(book.bids[0].price, "50000".parse().unwrap());
        assert_eq!(book.bids[1].price, "49900".parse().unwrap());
        assert_eq!(book.asks[0].price, "50100".parse().unwrap());
        assert_eq!(book.asks[1].price, "50200".parse().unwrap());
        assert_eq!(book.last_seq, Sequence::new(100));
    }

    #[test]
    fn test_snapshot_drops_zero_quantity_levels() {
        let payload = levels("BTC_USD", &[("50000", "1.5"), ("49900", "0")], &[]);
        let book = apply_snapshot(&payload, Sequence::new(1));
        assert_eq!(book.bid_depth(), 1);
    }

    #[test]
    fn test_delta_inserts_replaces_and_removes() {
        let snapshot = levels("BTC_USD", &[("50000", "1.5"), ("49900", "2")], &[("50100", "0.7")]);
        let book = apply_snapshot(&snapshot, Sequence::new(100));

        let delta = levels(
            "BTC_USD",
            &[("50000", "3"), ("49800", "1"), ("49900", "0")],
            &[],
        );
        let next = apply_delta(&book, &delta, Sequence::new(101));

        assert_eq!(next.bid_depth(), 2);
        assert_eq!(next.bids[0].price, "50000".parse().unwrap());
        assert_eq!(next.bids[0].quantity, "3".parse().unwrap());
        assert_eq!(next.bids[1].price, "49800".parse().unwrap());
        // untouched side carried over
        assert_eq!(next.asks, book.asks);
        assert_eq!(next.last_seq, Sequence::new(101));
    }

    #[test]
    fn test_delta_does_not_mutate_input() {
        let snapshot = levels("BTC_USD", &[("50000", "1.5")], &[("50100", "0.7")]);
        let book = apply_snapshot(&snapshot, Sequence::new(100));
        let before = book.clone();

        let delta = levels("BTC_USD", &[("50000", "0")], &[]);
        let _ = apply_delta(&book, &delta, Sequence::new(101));

        assert_eq!(book, before);
    }

    #[test]
    fn test_reducers_are_deterministic() {
        let snapshot = levels("BTC_USD", &[("50000", "1.5")], &[("50100", "0.7")]);
        let delta = levels("BTC_USD", &[("49999", "2")], &[]);

        let a = apply_delta(&apply_snapshot(&snapshot, Sequence::new(1)), &delta, Sequence::new(2));
        let b = apply_delta(&apply_snapshot(&snapshot, Sequence::new(1)), &delta, Sequence::new(2));
        assert_eq!(a, b);
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_levels_unique_per_price() {
        // duplicate price inside one snapshot collapses to a single level
        let payload = levels("BTC_USD", &[("50000", "1"), ("50000", "2")], &[]);
        let book = apply_snapshot(&payload, Sequence::new(1));
        assert_eq!(book.bid_depth(), 1);
        assert_eq!(book.bids[0].quantity, "2".parse().unwrap());
    }

    #[test]
    fn test_best_bid_below_best_ask_from_sane_snapshot() {
        let payload = levels("BTC_USD", &[("50000", "1")], &[("50100", "1")]);
        let book = apply_snapshot(&payload, Sequence::new(1));
        let bid = book.best_bid().unwrap().price;
        let ask = book.best_ask().unwrap().price;
        assert!(bid < ask);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let a = apply_snapshot(&levels("BTC_USD", &[("50000", "1")], &[]), Sequence::new(1));
        let b = apply_snapshot(&levels("BTC_USD", &[("50000", "2")], &[]), Sequence::new(1));
        assert_ne!(a.checksum(), b.checksum());
    }
}
