//! Order types carried by the account stream
//!
//! The client only mirrors what the server pushes: side, status, and the
//! order record held in the account projection. Lifecycle transitions happen
//! server-side.

use crate::ids::{OrderId, Symbol};
use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Order status as reported over the account stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Accepted and awaiting matching
    Pending,
    /// Partially matched
    Partial,
    /// Completely matched (terminal)
    Filled,
    /// Canceled by user or system (terminal)
    Canceled,
    /// Failed validation (terminal)
    Rejected,
    /// Time-in-force deadline reached (terminal)
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// An order as held in the account projection, keyed by `order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    #[serde(default = "Quantity::zero")]
    pub filled_quantity: Quantity,
    pub status: OrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::BUY.opposite(), Side::SELL);
        assert_eq!(Side::SELL.opposite(), Side::BUY);
    }

    #[test]
    fn test_side_serialization() {
        assert_eq!(serde_json::to_string(&Side::BUY).unwrap(), "\"BUY\"");
        let side: Side = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(side, Side::SELL);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_order_record_deserializes_without_filled_quantity() {
        let json = r#"{
            "order_id": "ord-1",
            "symbol": "BTC_USD",
            "side": "BUY",
            "price": "50000",
            "quantity": "1.5",
            "status": "PENDING"
        }"#;
        let record: OrderRecord = serde_json::from_str(json).unwrap();
        assert!(record.filled_quantity.is_zero());
        assert_eq!(record.status, OrderStatus::Pending);
    }
}
