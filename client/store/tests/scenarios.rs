//! End-to-end dispatch scenarios: sequencing, buffering, gap recovery,
//! duplicate suppression, and overflow resynchronisation.

use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use store::{DomainKey, SnapshotRequest, Store, StoreConfig};
use types::event::{Channel, Event, EventKind};
use types::ids::{EventId, Symbol};
use types::sequence::{Sequence, TimestampNs};

fn snapshot(seq: u64) -> Event {
    Event {
        event_id: EventId::new(format!("snap-{seq}")),
        event_type: EventKind::Snapshot,
        sequence: Sequence::new(seq),
        timestamp: TimestampNs::new(1708123456789000000 + seq as i64),
        source: Channel::MarketData,
        payload: json!({
            "symbol": "BTC_USD",
            "bids": [["50000", "1.5"], ["49900", "2"]],
            "asks": [["50100", "0.7"]]
        }),
        metadata: None,
    }
}

fn delta(seq: u64) -> Event {
    Event {
        event_id: EventId::new(format!("delta-{seq}")),
        event_type: EventKind::Delta,
        sequence: Sequence::new(seq),
        timestamp: TimestampNs::new(1708123456789000000 + seq as i64),
        source: Channel::MarketData,
        payload: json!({
            "symbol": "BTC_USD",
            "bids": [[format!("{}", 40000 + seq), "1"]]
        }),
        metadata: None,
    }
}

fn btc_key() -> DomainKey {
    DomainKey::Market {
        channel: Channel::MarketData,
        symbol: Symbol::new("BTC_USD"),
    }
}

fn capture_requests(store: &mut Store) -> Arc<Mutex<Vec<SnapshotRequest>>> {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&requests);
    store.on_request_snapshot(move |request| {
        if let Ok(mut sink) = sink.lock() {
            sink.push(request.clone());
        }
    });
    requests
}

#[test]
fn in_order_delta_flow() {
    let mut store = Store::with_defaults();
    store.dispatch(snapshot(100));
    store.dispatch(delta(101));

    assert_eq!(store.last_seq(&btc_key()), Sequence::new(101));
    assert_eq!(store.metrics().events_ignored, 0);
    assert_eq!(store.metrics().gaps_detected, 0);
    assert_eq!(store.buffered_len(&btc_key()), 0);
}

#[test]
fn pre_snapshot_delta_is_buffered_then_flushed() {
    let mut store = Store::with_defaults();
    let requests = capture_requests(&mut store);

    store.dispatch(delta(101));
    assert_eq!(store.metrics().gaps_detected, 0);
    assert_eq!(store.buffered_len(&btc_key()), 1);
    assert_eq!(store.last_seq(&btc_key()), Sequence::ZERO);
    // new-subscription path: request a fresh snapshot
    assert_eq!(requests.lock().unwrap().last().unwrap().since_seq, Sequence::ZERO);

    store.dispatch(snapshot(100));
    assert_eq!(store.last_seq(&btc_key()), Sequence::new(101));
    assert_eq!(store.buffered_len(&btc_key()), 0);
    assert_eq!(store.metrics().gaps_detected, 0);
}

#[test]
fn mid_stream_gap_requests_replay_and_buffer_closes() {
    let mut store = Store::with_defaults();
    let requests = capture_requests(&mut store);

    store.dispatch(snapshot(100));
    store.dispatch(delta(102));

    assert_eq!(store.metrics().gaps_detected, 1);
    assert_eq!(store.buffered_len(&btc_key()), 1);
    {
        let requests = requests.lock().unwrap();
        let last = requests.last().unwrap();
        assert_eq!(last.channel, Channel::MarketData);
        assert_eq!(last.symbol.as_ref().unwrap().as_str(), "BTC_USD");
        assert_eq!(last.since_seq, Sequence::new(100));
    }

    // the missing delta closes the gap and drains the buffer
    store.dispatch(delta(101));
    assert_eq!(store.last_seq(&btc_key()), Sequence::new(102));
    assert_eq!(store.buffered_len(&btc_key()), 0);
}

#[test]
fn duplicates_are_suppressed_by_id_and_by_sequence() {
    let mut store = Store::with_defaults();
    store.dispatch(snapshot(100));
    store.dispatch(delta(101));
    let book_before = store.orderbook(&Symbol::new("BTC_USD")).unwrap().clone();

    // same event redelivered, and a stale sequence under a fresh id
    store.dispatch(delta(101));
    store.dispatch(Event {
        event_id: EventId::new("fresh-id-stale-seq"),
        ..delta(100)
    });

    assert_eq!(store.metrics().events_ignored, 2);
    let book_after = store.orderbook(&Symbol::new("BTC_USD")).unwrap();
    assert_eq!(*book_after, book_before);
}

#[test]
fn dispatching_same_event_twice_is_idempotent() {
    let mut base = Store::with_defaults();
    base.dispatch(snapshot(100));
    base.dispatch(delta(101));
    let expected = base.orderbook(&Symbol::new("BTC_USD")).unwrap().checksum();

    let mut twice = Store::with_defaults();
    twice.dispatch(snapshot(100));
    twice.dispatch(delta(101));
    twice.dispatch(delta(101));

    assert_eq!(twice.orderbook(&Symbol::new("BTC_USD")).unwrap().checksum(), expected);
    assert_eq!(twice.metrics().events_ignored, 1);
}

#[test]
fn buffer_overflow_clears_and_requests_full_resync() {
    let mut store = Store::new(StoreConfig {
        max_buffered_deltas: 100,
        ..StoreConfig::default()
    });
    let requests = capture_requests(&mut store);

    store.dispatch(snapshot(100));
    // leave a gap at 101 so nothing ever applies, then flood the buffer
    for seq in 0..=100u64 {
        store.dispatch(delta(1000 + seq));
    }

    assert_eq!(store.metrics().buffer_overflows, 1);
    assert_eq!(store.buffered_len(&btc_key()), 0);
    let requests = requests.lock().unwrap();
    let last = requests.last().unwrap();
    assert_eq!(last.since_seq, Sequence::ZERO);
}

#[test]
fn buffer_overflow_at_default_cap() {
    let mut store = Store::with_defaults();
    let requests = capture_requests(&mut store);

    store.dispatch(snapshot(100));
    // 10,001 deltas starting at 1,000 with 101 permanently missing: the
    // last one tips the buffer over its 10,000-entry cap
    for seq in 0..=10_000u64 {
        store.dispatch(delta(1_000 + seq));
    }

    assert_eq!(store.metrics().buffer_overflows, 1);
    assert_eq!(store.buffered_len(&btc_key()), 0);
    assert_eq!(requests.lock().unwrap().last().unwrap().since_seq, Sequence::ZERO);
}

#[test]
fn replay_batch_equivalent_to_continuous_stream() {
    // Live connection: snapshot then deltas in order.
    let mut live = Store::with_defaults();
    live.dispatch(snapshot(100));
    for seq in 101..=105 {
        live.dispatch(delta(seq));
    }

    // Outage: delta 105 arrives first, the replay batch fills 101..=104,
    // and the stray delta drains from the buffer.
    let mut replayed = Store::with_defaults();
    replayed.dispatch(snapshot(100));
    replayed.dispatch(delta(105));
    for seq in 101..=104 {
        replayed.dispatch(delta(seq));
    }

    let symbol = Symbol::new("BTC_USD");
    assert_eq!(
        live.orderbook(&symbol).unwrap().checksum(),
        replayed.orderbook(&symbol).unwrap().checksum()
    );
    assert_eq!(replayed.last_seq(&btc_key()), Sequence::new(105));
    assert_eq!(replayed.buffered_len(&btc_key()), 0);
}

#[test]
fn streams_do_not_interfere() {
    let mut store = Store::with_defaults();
    store.dispatch(snapshot(100));

    // a trades-channel event for the same symbol is its own stream
    store.dispatch(Event {
        event_id: EventId::new("trade-1"),
        event_type: EventKind::Delta,
        sequence: Sequence::new(1),
        timestamp: TimestampNs::new(0),
        source: Channel::Trades,
        payload: json!({
            "symbol": "BTC_USD",
            "price": "50000",
            "quantity": "0.5",
            "side": "SELL"
        }),
        metadata: None,
    });

    assert_eq!(store.last_seq(&btc_key()), Sequence::new(100));
    let trades_key = DomainKey::Market {
        channel: Channel::Trades,
        symbol: Symbol::new("BTC_USD"),
    };
    assert_eq!(store.last_seq(&trades_key), Sequence::new(1));
    assert_eq!(store.trades(&Symbol::new("BTC_USD")).unwrap().len(), 1);
}

proptest! {
    /// Any arrival order of a contiguous delta range converges to the same
    /// projection as the in-order stream, with an empty buffer.
    #[test]
    fn shuffled_deltas_converge(order in Just((101u64..=112).collect::<Vec<_>>()).prop_shuffle()) {
        let mut in_order = Store::with_defaults();
        in_order.dispatch(snapshot(100));
        for seq in 101..=112 {
            in_order.dispatch(delta(seq));
        }

        let mut shuffled = Store::with_defaults();
        shuffled.dispatch(snapshot(100));
        for &seq in &order {
            shuffled.dispatch(delta(seq));
        }

        let symbol = Symbol::new("BTC_USD");
        prop_assert_eq!(
            shuffled.orderbook(&symbol).unwrap().checksum(),
            in_order.orderbook(&symbol).unwrap().checksum()
        );
        prop_assert_eq!(shuffled.last_seq(&btc_key()), Sequence::new(112));
        prop_assert_eq!(shuffled.buffered_len(&btc_key()), 0);
    }

    /// The buffer bound holds under arbitrary duplicate-laden input.
    #[test]
    fn buffer_stays_bounded(seqs in proptest::collection::vec(101u64..200, 1..60)) {
        let mut store = Store::new(StoreConfig {
            max_buffered_deltas: 16,
            ..StoreConfig::default()
        });
        store.dispatch(snapshot(100));
        for seq in seqs {
            store.dispatch(delta(seq));
            prop_assert!(store.buffered_len(&btc_key()) <= 16);
        }
    }

    /// Ignored-event accounting: re-dispatching an applied event increments
    /// `events_ignored` exactly once per duplicate.
    #[test]
    fn duplicate_accounting(extra in 1u64..5) {
        let mut store = Store::with_defaults();
        store.dispatch(snapshot(100));
        store.dispatch(delta(101));
        for _ in 0..extra {
            store.dispatch(delta(101));
        }
        prop_assert_eq!(store.metrics().events_ignored, extra);
    }
}
