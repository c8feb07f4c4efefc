use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{LineItem, OrderId, ProductId, UserId};

use crate::order::{Order, OrderLine, OrderStatus};
use crate::product::Product;
use crate::Result;

/// Sums requested quantities per product, preserving first-occurrence
/// order. An order listing the same product on several lines must be
/// validated against the combined quantity, not each line against the
/// same starting stock.
pub(crate) fn aggregate_quantities(items: &[LineItem]) -> Vec<(ProductId, u64)> {
    let mut seen = Vec::new();
    let mut totals: HashMap<ProductId, u64> = HashMap::new();
    for item in items {
        if !totals.contains_key(&item.product_id) {
            seen.push(item.product_id);
        }
        *totals.entry(item.product_id).or_insert(0) += u64::from(item.quantity);
    }
    seen.into_iter().map(|id| (id, totals[&id])).collect()
}

/// Outcome of a settlement transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Every line item was satisfied; stock decremented, order confirmed.
    Confirmed,

    /// A line item failed validation; order cancelled with the recorded
    /// reason and zero stock mutations applied.
    Cancelled { reason: String },

    /// The order was already in a terminal status. Nothing was mutated;
    /// redelivered placement messages take this path instead of
    /// double-decrementing stock.
    AlreadySettled {
        status: OrderStatus,
        reason: Option<String>,
    },
}

/// An event awaiting relay from the outbox to the broker.
///
/// Written in the same transaction as the state change it announces, so an
/// order can never be committed without its placement event (and vice
/// versa).
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub queue: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Core trait for store implementations.
///
/// All implementations must be thread-safe, and every method that mutates
/// state must do so atomically: either the whole operation commits or none
/// of it does.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Creates a PENDING order with its lines and an `order_placed` outbox
    /// entry, all in one transaction.
    ///
    /// Each product must exist. Stock is deliberately not checked here;
    /// stock correctness belongs to settlement. The current
    /// unit price is snapshotted into each line and the total computed from
    /// those snapshots.
    async fn create_pending_order(&self, user_id: UserId, items: &[LineItem]) -> Result<Order>;

    /// Runs the settlement transaction for one placement event.
    ///
    /// Locks the order row, then every referenced product row in payload
    /// order. All lines are validated before any stock is decremented: a
    /// missing product or insufficient stock cancels the order with a
    /// reason and leaves every product untouched. Only when all lines pass
    /// are the decrements applied and the order confirmed.
    ///
    /// An order already in a terminal status yields
    /// [`Settlement::AlreadySettled`] without mutating anything.
    async fn settle_order(&self, order_id: OrderId, items: &[LineItem]) -> Result<Settlement>;

    /// Retrieves an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Retrieves the lines of an order.
    async fn get_order_lines(&self, order_id: OrderId) -> Result<Vec<OrderLine>>;

    /// Retrieves a product by id.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Resolves a user's email address.
    async fn user_email(&self, user_id: UserId) -> Result<Option<String>>;

    /// Returns up to `limit` outbox entries in insertion order.
    async fn pending_outbox(&self, limit: u32) -> Result<Vec<OutboxEntry>>;

    /// Removes an outbox entry after it has been published.
    async fn delete_outbox(&self, entry_id: i64) -> Result<()>;
}
