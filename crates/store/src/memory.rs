use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use common::{LineItem, Money, OrderId, OrderPlaced, ProductId, QUEUE_ORDER_PLACED, UserId};

use crate::order::{Order, OrderLine, OrderStatus};
use crate::product::Product;
use crate::store::{FulfillmentStore, OutboxEntry, Settlement};
use crate::{Result, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    lines: Vec<OrderLine>,
    users: HashMap<UserId, String>,
    outbox: Vec<OutboxEntry>,
    next_order_id: i64,
    next_line_id: i64,
    next_outbox_id: i64,
}

/// In-memory store implementation for testing.
///
/// A single mutex stands in for the database's transactions and row locks:
/// every mutating operation holds it for its whole duration, giving the
/// same atomicity and serialization guarantees the PostgreSQL
/// implementation gets from `FOR UPDATE`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a product.
    pub fn add_product(&self, product: Product) {
        let mut state = self.state.lock().unwrap();
        state.products.insert(product.id, product);
    }

    /// Seeds a user with an email address.
    pub fn add_user(&self, user_id: UserId, email: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(user_id, email.into());
    }

    /// Returns the number of outbox entries awaiting relay.
    pub fn outbox_len(&self) -> usize {
        self.state.lock().unwrap().outbox.len()
    }
}

#[async_trait]
impl FulfillmentStore for MemoryStore {
    async fn create_pending_order(&self, user_id: UserId, items: &[LineItem]) -> Result<Order> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        // Existence check and price snapshot; stock is not checked here.
        let mut prices = Vec::with_capacity(items.len());
        let mut total = Money::zero();
        for item in items {
            let product = state
                .products
                .get(&item.product_id)
                .ok_or(StoreError::ProductNotFound(item.product_id))?;
            prices.push(product.price);
            total += product.price.multiply(item.quantity);
        }

        state.next_order_id += 1;
        let order = Order {
            id: OrderId::new(state.next_order_id),
            user_id,
            status: OrderStatus::Pending,
            total_amount: total,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order.id, order.clone());

        for (item, price) in items.iter().zip(prices) {
            state.next_line_id += 1;
            let line = OrderLine {
                id: state.next_line_id,
                order_id: order.id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: price,
                created_at: now,
            };
            state.lines.push(line);
        }

        let event = OrderPlaced::new(order.id, user_id, items.to_vec(), total);
        state.next_outbox_id += 1;
        let entry = OutboxEntry {
            id: state.next_outbox_id,
            queue: QUEUE_ORDER_PLACED.to_string(),
            payload: serde_json::to_value(&event)?,
            created_at: now,
        };
        state.outbox.push(entry);

        Ok(order)
    }

    async fn settle_order(&self, order_id: OrderId, items: &[LineItem]) -> Result<Settlement> {
        let mut state = self.state.lock().unwrap();

        let order = state
            .orders
            .get(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return Ok(Settlement::AlreadySettled {
                status: order.status,
                reason: order.failure_reason.clone(),
            });
        }

        // Validate every line before touching any stock, with quantities
        // combined per product so duplicate lines cannot oversell.
        let requested = crate::store::aggregate_quantities(items);
        let mut failure = None;
        for (product_id, quantity) in &requested {
            match state.products.get(product_id) {
                None => {
                    failure = Some(format!("product {product_id} not found"));
                    break;
                }
                Some(product) if u64::from(product.stock) < *quantity => {
                    failure = Some(format!(
                        "insufficient stock for {}, available={}, requested={}",
                        product.name, product.stock, quantity
                    ));
                    break;
                }
                Some(_) => {}
            }
        }

        let now = Utc::now();
        match failure {
            Some(reason) => {
                let order = state
                    .orders
                    .get_mut(&order_id)
                    .ok_or(StoreError::OrderNotFound(order_id))?;
                order.status = OrderStatus::Cancelled;
                order.failure_reason = Some(reason.clone());
                order.updated_at = now;
                Ok(Settlement::Cancelled { reason })
            }
            None => {
                for (product_id, quantity) in &requested {
                    if let Some(product) = state.products.get_mut(product_id) {
                        product.stock -= *quantity as u32;
                    }
                }
                let order = state
                    .orders
                    .get_mut(&order_id)
                    .ok_or(StoreError::OrderNotFound(order_id))?;
                order.status = OrderStatus::Confirmed;
                order.updated_at = now;
                Ok(Settlement::Confirmed)
            }
        }
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.lock().unwrap().orders.get(&order_id).cloned())
    }

    async fn get_order_lines(&self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .lines
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.lock().unwrap().products.get(&product_id).cloned())
    }

    async fn user_email(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn pending_outbox(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .outbox
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_outbox(&self, entry_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.outbox.retain(|e| e.id != entry_id);
        Ok(())
    }
}
