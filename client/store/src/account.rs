//! Account projection and reducers
//!
//! Mirrors the authenticated account: balances keyed by asset and open
//! orders keyed by order id. At most one account is held. Snapshots replace
//! wholesale; deltas merge balances field-wise and upsert orders.
//!
//! `BTreeMap` keeps iteration deterministic for listeners and tests.

use crate::payload::{AccountDeltaPayload, AccountSnapshotPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::ids::{AccountId, OrderId};
use types::numeric::Amount;
use types::order::OrderRecord;
use types::sequence::Sequence;

/// The authenticated account's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: AccountId,
    /// Asset symbol → balance.
    pub balances: BTreeMap<String, Amount>,
    /// Order id → order record.
    pub orders: BTreeMap<OrderId, OrderRecord>,
    /// Sequence of the last applied event.
    pub last_seq: Sequence,
}

/// Build account state from a snapshot: balances replaced wholesale, the
/// orders array keyed by order id.
pub fn apply_snapshot(payload: &AccountSnapshotPayload, sequence: Sequence) -> AccountState {
    let orders = payload
        .orders
        .iter()
        .map(|order| (order.order_id.clone(), order.clone()))
        .collect();

    AccountState {
        account_id: payload.account_id.clone(),
        balances: payload.balances.clone(),
        orders,
        last_seq: sequence,
    }
}

/// Merge a delta over the existing account state.
///
/// A delta with no prior state starts from an empty account whose id is
/// filled in by the next snapshot; the server sends the snapshot first on
/// every subscription, so this path only covers degenerate streams.
pub fn apply_delta(
    state: Option<&AccountState>,
    payload: &AccountDeltaPayload,
    sequence: Sequence,
) -> AccountState {
    let mut balances = state.map(|s| s.balances.clone()).unwrap_or_default();
    for (asset, amount) in &payload.balances {
        balances.insert(asset.clone(), *amount);
    }

    let mut orders = state.map(|s| s.orders.clone()).unwrap_or_default();
    if let Some(order) = &payload.order {
        orders.insert(order.order_id.clone(), order.clone());
    }

    AccountState {
        account_id: state
            .map(|s| s.account_id.clone())
            .unwrap_or_else(|| AccountId::new("")),
        balances,
        orders,
        last_seq: sequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::Symbol;
    use types::order::{OrderStatus, Side};

    fn order(id: &str, status: OrderStatus) -> OrderRecord {
        OrderRecord {
            order_id: OrderId::new(id),
            symbol: Symbol::new("BTC_USD"),
            side: Side::BUY,
            price: "50000".parse().unwrap(),
            quantity: "1".parse().unwrap(),
            filled_quantity: "0".parse().unwrap(),
            status,
        }
    }

    fn snapshot() -> AccountSnapshotPayload {
        AccountSnapshotPayload {
            account_id: AccountId::new("acct-1"),
            balances: BTreeMap::from([
                ("USD".to_string(), "10000".parse().unwrap()),
                ("BTC".to_string(), "0.5".parse().unwrap()),
            ]),
            orders: vec![order("ord-1", OrderStatus::Pending)],
        }
    }

    #[test]
    fn test_snapshot_keys_orders_by_id() {
        let state = apply_snapshot(&snapshot(), Sequence::new(100));
        assert_eq!(state.balances.len(), 2);
        assert!(state.orders.contains_key(&OrderId::new("ord-1")));
        assert_eq!(state.last_seq, Sequence::new(100));
    }

    #[test]
    fn test_delta_merges_balances_fieldwise() {
        let state = apply_snapshot(&snapshot(), Sequence::new(100));
        let delta = AccountDeltaPayload {
            balances: BTreeMap::from([("USD".to_string(), "9000".parse().unwrap())]),
            order: None,
        };

        let next = apply_delta(Some(&state), &delta, Sequence::new(101));
        assert_eq!(next.balances["USD"], "9000".parse().unwrap());
        // untouched asset retained
        assert_eq!(next.balances["BTC"], "0.5".parse().unwrap());
        assert_eq!(next.last_seq, Sequence::new(101));
    }

    #[test]
    fn test_delta_upserts_order() {
        let state = apply_snapshot(&snapshot(), Sequence::new(100));

        // update to an existing order
        let filled = AccountDeltaPayload {
            balances: BTreeMap::new(),
            order: Some(order("ord-1", OrderStatus::Filled)),
        };
        let next = apply_delta(Some(&state), &filled, Sequence::new(101));
        assert_eq!(next.orders[&OrderId::new("ord-1")].status, OrderStatus::Filled);
        assert_eq!(next.orders.len(), 1);

        // a brand new order inserts
        let inserted = AccountDeltaPayload {
            balances: BTreeMap::new(),
            order: Some(order("ord-2", OrderStatus::Pending)),
        };
        let next = apply_delta(Some(&next), &inserted, Sequence::new(102));
        assert_eq!(next.orders.len(), 2);
    }

    #[test]
    fn test_snapshot_replaces_balances_wholesale() {
        let state = apply_snapshot(&snapshot(), Sequence::new(100));
        let replacement = AccountSnapshotPayload {
            account_id: AccountId::new("acct-1"),
            balances: BTreeMap::from([("ETH".to_string(), "3".parse().unwrap())]),
            orders: Vec::new(),
        };

        let next = apply_snapshot(&replacement, Sequence::new(200));
        assert_eq!(next.balances.len(), 1);
        assert!(!next.balances.contains_key("USD"));
        assert!(next.orders.is_empty());
        // prior state untouched
        assert_eq!(state.balances.len(), 2);
    }
}
