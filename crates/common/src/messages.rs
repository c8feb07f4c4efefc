//! Message payloads exchanged over the broker.
//!
//! All payloads are immutable JSON objects. A placement event is the sole
//! trigger for settlement; outcome events trigger notification only and are
//! never read back by the settlement core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, OrderId, ProductId, UserId};

/// Queue carrying placement events from the producer to settlement.
pub const QUEUE_ORDER_PLACED: &str = "order_placed";

/// Queue carrying confirmed outcome events to the notification consumer.
pub const QUEUE_ORDER_CONFIRMED: &str = "order_confirmed";

/// Queue carrying failed outcome events to the notification consumer.
pub const QUEUE_ORDER_FAILED: &str = "order_failed";

/// Every queue used by the system, declared durably at connect time so
/// producers and consumers started in any order observe the same topology.
pub const QUEUES: [&str; 3] = [QUEUE_ORDER_PLACED, QUEUE_ORDER_CONFIRMED, QUEUE_ORDER_FAILED];

/// A requested line item: product and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl LineItem {
    /// Creates a new line item.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Placement event announcing a newly created order awaiting settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<LineItem>,
    pub total_amount: Money,
    pub timestamp: DateTime<Utc>,
}

impl OrderPlaced {
    /// Creates a placement event timestamped now.
    pub fn new(order_id: OrderId, user_id: UserId, items: Vec<LineItem>, total_amount: Money) -> Self {
        Self {
            order_id,
            user_id,
            items,
            total_amount,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome event announcing a confirmed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub user_email: String,
    pub timestamp: DateTime<Utc>,
}

impl OrderConfirmed {
    /// Creates a confirmed outcome event timestamped now.
    pub fn new(order_id: OrderId, user_id: UserId, user_email: impl Into<String>) -> Self {
        Self {
            order_id,
            user_id,
            user_email: user_email.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome event announcing a cancelled order, carrying the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFailed {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub user_email: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl OrderFailed {
    /// Creates a failed outcome event timestamped now.
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        user_email: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            user_id,
            user_email: user_email.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_placed_roundtrip() {
        let event = OrderPlaced::new(
            OrderId::new(1),
            UserId::new(2),
            vec![LineItem::new(3, 4)],
            Money::from_cents(5000),
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: OrderPlaced = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn order_placed_wire_fields() {
        let event = OrderPlaced::new(
            OrderId::new(10),
            UserId::new(20),
            vec![LineItem::new(30, 2)],
            Money::from_cents(1999),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["order_id"], 10);
        assert_eq!(value["user_id"], 20);
        assert_eq!(value["items"][0]["product_id"], 30);
        assert_eq!(value["items"][0]["quantity"], 2);
        assert_eq!(value["total_amount"], 1999);
    }

    #[test]
    fn order_failed_carries_reason() {
        let event = OrderFailed::new(
            OrderId::new(1),
            UserId::new(2),
            "jane@example.com",
            "insufficient stock",
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["user_email"], "jane@example.com");
        assert_eq!(value["reason"], "insufficient stock");
    }

    #[test]
    fn queue_names_are_distinct() {
        assert_eq!(QUEUES.len(), 3);
        assert_ne!(QUEUE_ORDER_PLACED, QUEUE_ORDER_CONFIRMED);
        assert_ne!(QUEUE_ORDER_CONFIRMED, QUEUE_ORDER_FAILED);
    }
}
