//! The state store: dispatch pipeline and read surface
//!
//! `Store::dispatch` routes every event through interpret → dedupe →
//! sequence check → reducer → buffer flush, then notifies listeners. It
//! never panics into the caller: bad payloads and duplicates become
//! counters, gaps and overflows become snapshot requests.
//!
//! Snapshots are always accepted and replace their projection wholesale,
//! resetting the stream cursor to the snapshot's sequence. Deltas apply only
//! at exactly `last_seq + 1`; anything ahead of that waits in the per-stream
//! buffer while a replay is requested.
//!
//! Listener callbacks run after the triggering mutation is fully committed
//! and must not re-enter `dispatch`.

use crate::account::{self, AccountState};
use crate::book::{self, Orderbook};
use crate::buffer::{BufferedDelta, DeltaBuffer};
use crate::cursor::StreamCursor;
use crate::key::DomainKey;
use crate::metrics::StoreMetrics;
use crate::payload::{self, Payload};
use crate::tape::{self, TradeTape};
use crate::ticker::{self, Ticker};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use types::event::{Channel, Event, EventKind};
use types::ids::Symbol;
use types::sequence::Sequence;

/// Bounds for the store's three memory-limiting mechanisms.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Per-stream cap on buffered out-of-order deltas.
    pub max_buffered_deltas: usize,
    /// Per-stream cap on the duplicate-suppression id set.
    pub dedup_capacity: usize,
    /// Per-symbol cap on the trade tape.
    pub max_trades_per_symbol: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_buffered_deltas: 10_000,
            dedup_capacity: 10_000,
            max_trades_per_symbol: 500,
        }
    }
}

/// Which projection a committed mutation touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Orderbook(Symbol),
    Ticker(Symbol),
    Trades(Symbol),
    Account,
}

/// A request for the transport to replay a stream from `since_seq`.
///
/// `since_seq == 0` asks for a fresh snapshot (new subscription or full
/// resynchronisation); otherwise the server replays everything after
/// `since_seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub channel: Channel,
    pub symbol: Option<Symbol>,
    pub since_seq: Sequence,
}

/// Handle returned by listener registration; pass back to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type ChangeListener = Box<dyn Fn(&StateChange) + Send>;
type RequestListener = Box<dyn Fn(&SnapshotRequest) + Send>;

/// Borrowed view over every projection at once.
pub struct StateView<'a> {
    pub books: &'a BTreeMap<Symbol, Orderbook>,
    pub tickers: &'a BTreeMap<Symbol, Ticker>,
    pub tapes: &'a BTreeMap<Symbol, TradeTape>,
    pub account: Option<&'a AccountState>,
}

enum FlushStep {
    Discard,
    Apply,
}

/// Event-sourced store of all client-side projections.
pub struct Store {
    config: StoreConfig,
    books: BTreeMap<Symbol, Orderbook>,
    tickers: BTreeMap<Symbol, Ticker>,
    tapes: BTreeMap<Symbol, TradeTape>,
    account: Option<AccountState>,
    cursors: BTreeMap<DomainKey, StreamCursor>,
    buffers: BTreeMap<DomainKey, DeltaBuffer>,
    metrics: StoreMetrics,
    change_listeners: Vec<(u64, ChangeListener)>,
    request_listeners: Vec<(u64, RequestListener)>,
    next_listener_id: u64,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            books: BTreeMap::new(),
            tickers: BTreeMap::new(),
            tapes: BTreeMap::new(),
            account: None,
            cursors: BTreeMap::new(),
            buffers: BTreeMap::new(),
            metrics: StoreMetrics::default(),
            change_listeners: Vec::new(),
            request_listeners: Vec::new(),
            next_listener_id: 1,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(StoreConfig::default())
    }

    /// Route one event through the pipeline.
    ///
    /// All failure modes are reflected in metrics or recovery requests;
    /// this never returns an error and never panics.
    pub fn dispatch(&mut self, event: Event) {
        let Some(interpreted) = payload::interpret(&event) else {
            self.metrics.payloads_rejected += 1;
            debug!(
                event_id = %event.event_id,
                source = %event.source,
                "dropping event with unexpected payload"
            );
            return;
        };
        let key = DomainKey::for_payload(event.source, &interpreted);

        let mut changes = Vec::new();
        let mut requests = Vec::new();
        match event.event_type {
            EventKind::Snapshot => {
                // Snapshots are accepted regardless of sequence (they
                // replace wholesale), but a redelivery of the same event is
                // still a duplicate.
                let dedup_capacity = self.config.dedup_capacity;
                let cursor = self
                    .cursors
                    .entry(key.clone())
                    .or_insert_with(|| StreamCursor::new(dedup_capacity));
                if cursor.seen_ids.contains(&event.event_id) {
                    self.metrics.events_ignored += 1;
                    debug!(
                        stream = %key,
                        event_id = %event.event_id,
                        "dropping redelivered snapshot"
                    );
                    return;
                }
                self.apply_payload(&key, &event, &interpreted, &mut changes);
                self.metrics.snapshots_applied += 1;
                self.flush_buffer(&key, &mut changes);
            }
            EventKind::Delta => {
                self.dispatch_delta(key, event, interpreted, &mut changes, &mut requests);
            }
        }

        self.notify(&changes, &requests);
    }

    fn dispatch_delta(
        &mut self,
        key: DomainKey,
        event: Event,
        interpreted: Payload,
        changes: &mut Vec<StateChange>,
        requests: &mut Vec<SnapshotRequest>,
    ) {
        let dedup_capacity = self.config.dedup_capacity;
        let cursor = self
            .cursors
            .entry(key.clone())
            .or_insert_with(|| StreamCursor::new(dedup_capacity));

        if cursor.is_duplicate(&event.event_id, event.sequence) {
            self.metrics.events_ignored += 1;
            debug!(
                stream = %key,
                event_id = %event.event_id,
                sequence = event.sequence.value(),
                "dropping duplicate event"
            );
            return;
        }

        let last_seq = cursor.last_seq;
        if event.sequence == cursor.expected() {
            self.apply_payload(&key, &event, &interpreted, changes);
            self.flush_buffer(&key, changes);
            return;
        }

        // Ahead of the stream: a gap on a live stream, or an early delta on
        // a stream still waiting for its initial snapshot.
        if !last_seq.is_zero() {
            self.metrics.gaps_detected += 1;
            warn!(
                stream = %key,
                expected = last_seq.next().value(),
                received = event.sequence.value(),
                "sequence gap detected, requesting replay"
            );
        } else {
            debug!(
                stream = %key,
                received = event.sequence.value(),
                "delta ahead of initial snapshot, buffering"
            );
        }

        let channel = event.source;
        let symbol = interpreted.symbol().cloned();
        let buffer_capacity = self.config.max_buffered_deltas;
        let buffer = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| DeltaBuffer::new(buffer_capacity));

        if buffer.push(BufferedDelta {
            event,
            payload: interpreted,
        }) {
            let since_seq = if last_seq.is_zero() { Sequence::ZERO } else { last_seq };
            requests.push(SnapshotRequest {
                channel,
                symbol,
                since_seq,
            });
        } else {
            buffer.clear();
            self.metrics.buffer_overflows += 1;
            warn!(stream = %key, "delta buffer overflow, forcing full resynchronisation");
            requests.push(SnapshotRequest {
                channel,
                symbol,
                since_seq: Sequence::ZERO,
            });
        }
    }

    /// Apply an interpreted payload through its reducer and commit the
    /// cursor. Callers have already established that the event is
    /// applicable (snapshot, or delta at exactly the expected sequence).
    fn apply_payload(
        &mut self,
        key: &DomainKey,
        event: &Event,
        interpreted: &Payload,
        changes: &mut Vec<StateChange>,
    ) {
        match interpreted {
            Payload::BookSnapshot(levels) => {
                let next = book::apply_snapshot(levels, event.sequence);
                self.books.insert(levels.symbol.clone(), next);
                changes.push(StateChange::Orderbook(levels.symbol.clone()));
            }
            Payload::BookDelta(levels) => {
                let base = self
                    .books
                    .get(&levels.symbol)
                    .cloned()
                    .unwrap_or_else(|| Orderbook::empty(levels.symbol.clone()));
                let next = book::apply_delta(&base, levels, event.sequence);
                self.books.insert(levels.symbol.clone(), next);
                changes.push(StateChange::Orderbook(levels.symbol.clone()));
            }
            Payload::Ticker(update) => {
                let next = ticker::apply_update(self.tickers.get(&update.symbol), update, event.sequence);
                self.tickers.insert(update.symbol.clone(), next);
                changes.push(StateChange::Ticker(update.symbol.clone()));
            }
            Payload::Trade(trade) => {
                let base = self
                    .tapes
                    .get(&trade.symbol)
                    .cloned()
                    .unwrap_or_else(|| TradeTape::empty(trade.symbol.clone()));
                let next = tape::apply_trade(
                    &base,
                    &event.event_id,
                    event.timestamp,
                    trade,
                    self.config.max_trades_per_symbol,
                );
                self.tapes.insert(trade.symbol.clone(), next);
                changes.push(StateChange::Trades(trade.symbol.clone()));
            }
            Payload::TapeSnapshot(snapshot) => {
                let next = tape::apply_snapshot(
                    &event.event_id,
                    event.timestamp,
                    snapshot,
                    self.config.max_trades_per_symbol,
                );
                self.tapes.insert(snapshot.symbol.clone(), next);
                changes.push(StateChange::Trades(snapshot.symbol.clone()));
            }
            Payload::AccountSnapshot(snapshot) => {
                self.account = Some(account::apply_snapshot(snapshot, event.sequence));
                changes.push(StateChange::Account);
            }
            Payload::AccountDelta(delta) => {
                self.account = Some(account::apply_delta(self.account.as_ref(), delta, event.sequence));
                changes.push(StateChange::Account);
            }
        }

        let dedup_capacity = self.config.dedup_capacity;
        let cursor = self
            .cursors
            .entry(key.clone())
            .or_insert_with(|| StreamCursor::new(dedup_capacity));
        cursor.advance(event.sequence, event.event_id.clone());
        self.metrics.events_applied += 1;
    }

    /// Drain the stream's buffer after a successful apply: duplicates are
    /// discarded, contiguous successors apply, and the scan halts at the
    /// first remaining gap (leaving the tail buffered, with no new request
    /// until the next arrival).
    fn flush_buffer(&mut self, key: &DomainKey, changes: &mut Vec<StateChange>) {
        let Some(mut buffer) = self.buffers.remove(key) else {
            return;
        };
        buffer.sort();

        loop {
            let step = match (self.cursors.get(key), buffer.front()) {
                (Some(cursor), Some(front)) => {
                    if cursor.is_duplicate(&front.event.event_id, front.event.sequence) {
                        FlushStep::Discard
                    } else if front.event.sequence == cursor.expected() {
                        FlushStep::Apply
                    } else {
                        break;
                    }
                }
                _ => break,
            };

            match step {
                FlushStep::Discard => {
                    buffer.pop_front();
                }
                FlushStep::Apply => {
                    let Some(entry) = buffer.pop_front() else { break };
                    self.apply_payload(key, &entry.event, &entry.payload, changes);
                }
            }
        }

        if !buffer.is_empty() {
            self.buffers.insert(key.clone(), buffer);
        }
    }

    fn notify(&self, changes: &[StateChange], requests: &[SnapshotRequest]) {
        for change in changes {
            for (_, listener) in &self.change_listeners {
                listener(change);
            }
        }
        for request in requests {
            for (_, listener) in &self.request_listeners {
                listener(request);
            }
        }
    }

    // Read surface

    pub fn orderbook(&self, symbol: &Symbol) -> Option<&Orderbook> {
        self.books.get(symbol)
    }

    pub fn ticker(&self, symbol: &Symbol) -> Option<&Ticker> {
        self.tickers.get(symbol)
    }

    pub fn trades(&self, symbol: &Symbol) -> Option<&TradeTape> {
        self.tapes.get(symbol)
    }

    pub fn account(&self) -> Option<&AccountState> {
        self.account.as_ref()
    }

    pub fn state(&self) -> StateView<'_> {
        StateView {
            books: &self.books,
            tickers: &self.tickers,
            tapes: &self.tapes,
            account: self.account.as_ref(),
        }
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.metrics
    }

    /// Cursor position of a stream; `Sequence::ZERO` if untouched.
    pub fn last_seq(&self, key: &DomainKey) -> Sequence {
        self.cursors.get(key).map(|c| c.last_seq).unwrap_or(Sequence::ZERO)
    }

    /// Number of deltas buffered for a stream.
    pub fn buffered_len(&self, key: &DomainKey) -> usize {
        self.buffers.get(key).map(DeltaBuffer::len).unwrap_or(0)
    }

    // Listener registries

    pub fn on_state_change(&mut self, listener: impl Fn(&StateChange) + Send + 'static) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.change_listeners.push((id, Box::new(listener)));
        ListenerId(id)
    }

    pub fn remove_state_listener(&mut self, id: ListenerId) {
        self.change_listeners.retain(|(entry, _)| *entry != id.0);
    }

    pub fn on_request_snapshot(
        &mut self,
        listener: impl Fn(&SnapshotRequest) + Send + 'static,
    ) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.request_listeners.push((id, Box::new(listener)));
        ListenerId(id)
    }

    pub fn remove_snapshot_listener(&mut self, id: ListenerId) {
        self.request_listeners.retain(|(entry, _)| *entry != id.0);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use types::ids::EventId;
    use types::sequence::TimestampNs;

    fn book_snapshot(seq: u64) -> Event {
        Event {
            event_id: EventId::new(format!("snap-{seq}")),
            event_type: EventKind::Snapshot,
            sequence: Sequence::new(seq),
            timestamp: TimestampNs::new(1708123456789000000),
            source: Channel::MarketData,
            payload: json!({
                "symbol": "BTC_USD",
                "bids": [["50000", "1.5"]],
                "asks": [["50100", "0.7"]]
            }),
            metadata: None,
        }
    }

    fn book_delta(seq: u64) -> Event {
        Event {
            event_id: EventId::new(format!("delta-{seq}")),
            event_type: EventKind::Delta,
            sequence: Sequence::new(seq),
            timestamp: TimestampNs::new(1708123456789000000),
            source: Channel::MarketData,
            payload: json!({
                "symbol": "BTC_USD",
                "bids": [[format!("{}", 49000 + seq), "1"]]
            }),
            metadata: None,
        }
    }

    fn market_key() -> DomainKey {
        DomainKey::Market {
            channel: Channel::MarketData,
            symbol: Symbol::new("BTC_USD"),
        }
    }

    #[test]
    fn test_snapshot_then_delta_applies_in_order() {
        let mut store = Store::with_defaults();
        store.dispatch(book_snapshot(100));
        store.dispatch(book_delta(101));

        assert_eq!(store.last_seq(&market_key()), Sequence::new(101));
        assert_eq!(store.metrics().events_ignored, 0);
        assert_eq!(store.metrics().gaps_detected, 0);
        assert_eq!(store.buffered_len(&market_key()), 0);
    }

    #[test]
    fn test_snapshot_always_accepted_even_backwards() {
        let mut store = Store::with_defaults();
        store.dispatch(book_snapshot(100));
        // A replacement snapshot at a lower sequence still applies wholesale.
        store.dispatch(book_snapshot(50));
        assert_eq!(store.last_seq(&market_key()), Sequence::new(50));
        assert_eq!(store.metrics().snapshots_applied, 2);
    }

    #[test]
    fn test_redelivered_snapshot_is_a_duplicate() {
        let mut store = Store::with_defaults();
        store.dispatch(book_snapshot(100));
        store.dispatch(book_snapshot(100));
        assert_eq!(store.metrics().snapshots_applied, 1);
        assert_eq!(store.metrics().events_ignored, 1);
    }

    #[test]
    fn test_unexpected_payload_dropped_without_side_effects() {
        let mut store = Store::with_defaults();
        store.dispatch(Event {
            event_id: EventId::new("bad-1"),
            event_type: EventKind::Delta,
            sequence: Sequence::new(1),
            timestamp: TimestampNs::new(0),
            source: Channel::Trades,
            payload: json!({"nonsense": true}),
            metadata: None,
        });

        assert_eq!(store.metrics().payloads_rejected, 1);
        assert_eq!(store.metrics().events_ignored, 0);
        assert_eq!(store.last_seq(&market_key()), Sequence::ZERO);
    }

    #[test]
    fn test_listener_unsubscribe() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let mut store = Store::with_defaults();
        let hits = Arc::new(AtomicU64::new(0));
        let hits_in_listener = Arc::clone(&hits);
        let id = store.on_state_change(move |_| {
            hits_in_listener.fetch_add(1, Ordering::Relaxed);
        });

        store.dispatch(book_snapshot(100));
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        store.remove_state_listener(id);
        store.dispatch(book_delta(101));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_notifications_fire_after_commit() {
        // The listener fires once per committed mutation, including the
        // buffered delta consumed by the flush after its snapshot.
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let mut store = Store::with_defaults();
        let hits = Arc::new(AtomicU64::new(0));
        let hits_in_listener = Arc::clone(&hits);
        store.on_state_change(move |_| {
            hits_in_listener.fetch_add(1, Ordering::Relaxed);
        });

        store.dispatch(book_delta(101)); // buffered, no commit
        assert_eq!(hits.load(Ordering::Relaxed), 0);

        store.dispatch(book_snapshot(100)); // snapshot + flushed delta
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_state_view_exposes_projections() {
        let mut store = Store::with_defaults();
        store.dispatch(book_snapshot(100));

        let view = store.state();
        assert_eq!(view.books.len(), 1);
        assert!(view.account.is_none());
    }
}
