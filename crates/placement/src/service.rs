//! Order placement: the producer side of the fulfillment pipeline.

use std::sync::Arc;

use tracing::instrument;

use common::{LineItem, UserId};
use store::{FulfillmentStore, Order};

use crate::{PlacementError, Result};

/// Validates placement requests and creates pending orders.
///
/// Placement checks only what it can answer locally: the request shape and
/// product existence. Stock is not consulted; whether an order can actually
/// be fulfilled is settlement's decision, made later under row locks. The
/// placement event reaches the broker through the outbox, never directly.
pub struct PlacementService {
    store: Arc<dyn FulfillmentStore>,
}

impl PlacementService {
    pub fn new(store: Arc<dyn FulfillmentStore>) -> Self {
        Self { store }
    }

    /// Places an order for the given user.
    ///
    /// On success the order is committed as PENDING together with its lines
    /// and an `order_placed` outbox entry; the caller observes the order
    /// before settlement has run.
    #[instrument(skip(self, items), fields(user_id = %user_id, item_count = items.len()))]
    pub async fn place_order(&self, user_id: UserId, items: &[LineItem]) -> Result<Order> {
        if items.is_empty() {
            return Err(PlacementError::EmptyOrder);
        }
        for item in items {
            if item.quantity == 0 {
                return Err(PlacementError::InvalidQuantity(item.product_id));
            }
        }

        let order = self.store.create_pending_order(user_id, items).await?;
        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(order_id = %order.id, total = %order.total_amount, "order placed");
        Ok(order)
    }
}
