//! Subscription registry
//!
//! Tracks every subscription the caller has requested, keyed
//! deterministically by channel plus canonically-ordered parameters, along
//! with the highest sequence observed or acknowledged on that stream. The
//! cursor is what reconnection replays from: after a drop, every entry with
//! a non-zero cursor gets a `snapshot_since` for the events missed during
//! the outage.

use crate::protocol::Params;
use std::collections::BTreeMap;
use std::fmt;
use types::event::Channel;
use types::sequence::Sequence;

/// Deterministic identity of one subscription.
///
/// `Params` is an ordered map, so equal (channel, params) pairs always
/// produce equal keys regardless of caller-side insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    pub channel: Channel,
    pub params: Params,
}

impl SubscriptionKey {
    pub fn new(channel: Channel, params: Params) -> Self {
        Self { channel, params }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channel)?;
        for (key, value) in &self.params {
            write!(f, ":{}={}", key, value)?;
        }
        Ok(())
    }
}

/// State held per subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionState {
    /// Highest sequence observed on the stream or acknowledged by the
    /// server's `subscribed.snapshot_seq`.
    pub last_seq: Sequence,
    /// Whether the server has acknowledged the subscription on the current
    /// connection. Cleared on every disconnect.
    pub confirmed: bool,
}

/// All subscriptions for one client.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    entries: BTreeMap<SubscriptionKey, SubscriptionState>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; keeps the existing cursor when the caller
    /// re-subscribes to a known key.
    pub fn register(&mut self, key: SubscriptionKey) {
        self.entries.entry(key).or_insert(SubscriptionState {
            last_seq: Sequence::ZERO,
            confirmed: false,
        });
    }

    pub fn remove(&mut self, key: &SubscriptionKey) -> Option<SubscriptionState> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionState> {
        self.entries.get(key)
    }

    pub fn is_confirmed(&self, key: &SubscriptionKey) -> bool {
        self.entries.get(key).map(|s| s.confirmed).unwrap_or(false)
    }

    /// Mark acknowledged and advance the cursor to the server's snapshot
    /// sequence. Returns false for an ack with no matching entry.
    pub fn confirm(&mut self, key: &SubscriptionKey, snapshot_seq: Sequence) -> bool {
        match self.entries.get_mut(key) {
            Some(state) => {
                state.confirmed = true;
                if snapshot_seq > state.last_seq {
                    state.last_seq = snapshot_seq;
                }
                true
            }
            None => false,
        }
    }

    /// Advance the cursor of the stream an event arrived on.
    pub fn observe_event(&mut self, channel: Channel, symbol: Option<&str>, sequence: Sequence) {
        let key = Self::stream_key(channel, symbol);
        if let Some(state) = self.entries.get_mut(&key) {
            if sequence > state.last_seq {
                state.last_seq = sequence;
            }
        }
    }

    /// Drop all connection-scoped state (acks) while keeping cursors.
    pub fn mark_all_unconfirmed(&mut self) {
        for state in self.entries.values_mut() {
            state.confirmed = false;
        }
    }

    /// Iterate all entries in deterministic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&SubscriptionKey, &SubscriptionState)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The key an event on (channel, symbol) belongs to: symbol streams
    /// subscribe with a `symbol` parameter, the account stream with none.
    pub fn stream_key(channel: Channel, symbol: Option<&str>) -> SubscriptionKey {
        let mut params = Params::new();
        if let Some(symbol) = symbol {
            params.insert("symbol".to_string(), symbol.to_string());
        }
        SubscriptionKey::new(channel, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_key() -> SubscriptionKey {
        SubscriptionTable::stream_key(Channel::MarketData, Some("BTC_USD"))
    }

    #[test]
    fn test_key_is_deterministic_across_insertion_order() {
        let mut forward = Params::new();
        forward.insert("a".to_string(), "1".to_string());
        forward.insert("b".to_string(), "2".to_string());

        let mut reverse = Params::new();
        reverse.insert("b".to_string(), "2".to_string());
        reverse.insert("a".to_string(), "1".to_string());

        assert_eq!(
            SubscriptionKey::new(Channel::Trades, forward),
            SubscriptionKey::new(Channel::Trades, reverse)
        );
    }

    #[test]
    fn test_key_display() {
        assert_eq!(btc_key().to_string(), "market_data:symbol=BTC_USD");
        assert_eq!(
            SubscriptionTable::stream_key(Channel::Account, None).to_string(),
            "account"
        );
    }

    #[test]
    fn test_register_preserves_cursor_on_resubscribe() {
        let mut table = SubscriptionTable::new();
        table.register(btc_key());
        table.confirm(&btc_key(), Sequence::new(100));
        table.observe_event(Channel::MarketData, Some("BTC_USD"), Sequence::new(150));

        // disconnect clears acks but keeps cursors
        table.mark_all_unconfirmed();
        table.register(btc_key());

        let state = table.get(&btc_key()).unwrap();
        assert_eq!(state.last_seq, Sequence::new(150));
        assert!(!state.confirmed);
    }

    #[test]
    fn test_observe_event_never_regresses() {
        let mut table = SubscriptionTable::new();
        table.register(btc_key());
        table.observe_event(Channel::MarketData, Some("BTC_USD"), Sequence::new(150));
        table.observe_event(Channel::MarketData, Some("BTC_USD"), Sequence::new(140));

        assert_eq!(table.get(&btc_key()).unwrap().last_seq, Sequence::new(150));
    }

    #[test]
    fn test_confirm_unknown_key() {
        let mut table = SubscriptionTable::new();
        assert!(!table.confirm(&btc_key(), Sequence::new(1)));
    }

    #[test]
    fn test_events_for_unsubscribed_streams_are_ignored() {
        let mut table = SubscriptionTable::new();
        table.observe_event(Channel::MarketData, Some("BTC_USD"), Sequence::new(10));
        assert!(table.is_empty());
    }
}
