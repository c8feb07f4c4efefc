//! PostgreSQL-backed implementation of [`FulfillmentStore`].
//!
//! Settlement relies on row-level locks: the order row and every referenced
//! product row are taken `FOR UPDATE` inside one transaction, in payload
//! order, so concurrent settlements serialize per product and stock can
//! never be driven below zero.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::instrument;

use common::{LineItem, Money, OrderId, OrderPlaced, ProductId, QUEUE_ORDER_PLACED, UserId};

use crate::order::{Order, OrderLine, OrderStatus};
use crate::product::Product;
use crate::store::{FulfillmentStore, OutboxEntry, Settlement};
use crate::{Result, StoreError};

/// PostgreSQL implementation of the fulfillment store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to PostgreSQL with a bounded pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Runs pending database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_status(value: String) -> Result<OrderStatus> {
        OrderStatus::parse(&value).ok_or(StoreError::UnknownStatus(value))
    }
}

type OrderRow = (
    i64,
    i64,
    String,
    i64,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn order_from_row(row: OrderRow) -> Result<Order> {
    let (id, user_id, status, total_cents, failure_reason, created_at, updated_at) = row;
    Ok(Order {
        id: OrderId::new(id),
        user_id: UserId::new(user_id),
        status: PostgresStore::parse_status(status)?,
        total_amount: Money::from_cents(total_cents),
        failure_reason,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl FulfillmentStore for PostgresStore {
    #[instrument(skip(self, items), fields(user_id = %user_id, item_count = items.len()))]
    async fn create_pending_order(&self, user_id: UserId, items: &[LineItem]) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        // Snapshot current prices; stock is deliberately not examined here.
        let mut prices = Vec::with_capacity(items.len());
        let mut total = Money::zero();
        for item in items {
            let row: Option<(i64,)> = sqlx::query_as("SELECT price_cents FROM products WHERE id = $1")
                .bind(item.product_id.as_i64())
                .fetch_optional(&mut *tx)
                .await?;
            let (price_cents,) = row.ok_or(StoreError::ProductNotFound(item.product_id))?;
            let price = Money::from_cents(price_cents);
            prices.push(price);
            total += price.multiply(item.quantity);
        }

        let (order_id, created_at, updated_at): (i64, DateTime<Utc>, DateTime<Utc>) =
            sqlx::query_as(
                "INSERT INTO orders (user_id, status, total_amount_cents)
                 VALUES ($1, $2, $3)
                 RETURNING id, created_at, updated_at",
            )
            .bind(user_id.as_i64())
            .bind(OrderStatus::Pending.as_str())
            .bind(total.cents())
            .fetch_one(&mut *tx)
            .await?;

        for (item, price) in items.iter().zip(&prices) {
            sqlx::query(
                "INSERT INTO order_lines (order_id, product_id, quantity, unit_price_cents)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order_id)
            .bind(item.product_id.as_i64())
            .bind(item.quantity as i32)
            .bind(price.cents())
            .execute(&mut *tx)
            .await?;
        }

        let order = Order {
            id: OrderId::new(order_id),
            user_id,
            status: OrderStatus::Pending,
            total_amount: total,
            failure_reason: None,
            created_at,
            updated_at,
        };

        let event = OrderPlaced::new(order.id, user_id, items.to_vec(), total);
        sqlx::query("INSERT INTO order_outbox (queue, payload) VALUES ($1, $2)")
            .bind(QUEUE_ORDER_PLACED)
            .bind(serde_json::to_value(&event)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(order_id = %order.id, total = %total, "order created");
        Ok(order)
    }

    #[instrument(skip(self, items), fields(order_id = %order_id, item_count = items.len()))]
    async fn settle_order(&self, order_id: OrderId, items: &[LineItem]) -> Result<Settlement> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT status, failure_reason FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.as_i64())
                .fetch_optional(&mut *tx)
                .await?;
        let (status, stored_reason) = row.ok_or(StoreError::OrderNotFound(order_id))?;
        let status = Self::parse_status(status)?;
        if status.is_terminal() {
            tx.rollback().await?;
            return Ok(Settlement::AlreadySettled {
                status,
                reason: stored_reason,
            });
        }

        // Lock and validate every product before any decrement, with
        // quantities combined per product so duplicate lines cannot
        // oversell. Each product row is locked once.
        let requested = crate::store::aggregate_quantities(items);
        let mut failure = None;
        for (product_id, quantity) in &requested {
            let row: Option<(String, i32)> =
                sqlx::query_as("SELECT name, stock FROM products WHERE id = $1 FOR UPDATE")
                    .bind(product_id.as_i64())
                    .fetch_optional(&mut *tx)
                    .await?;
            match row {
                None => {
                    failure = Some(format!("product {product_id} not found"));
                    break;
                }
                Some((name, stock)) if (stock as u64) < *quantity => {
                    failure = Some(format!(
                        "insufficient stock for {name}, available={stock}, requested={quantity}"
                    ));
                    break;
                }
                Some(_) => {}
            }
        }

        match failure {
            Some(reason) => {
                sqlx::query(
                    "UPDATE orders
                     SET status = $2, failure_reason = $3, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(order_id.as_i64())
                .bind(OrderStatus::Cancelled.as_str())
                .bind(&reason)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                tracing::warn!(order_id = %order_id, %reason, "order cancelled");
                metrics::counter!("orders_cancelled_total").increment(1);
                Ok(Settlement::Cancelled { reason })
            }
            None => {
                for (product_id, quantity) in &requested {
                    sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1")
                        .bind(product_id.as_i64())
                        .bind(*quantity as i32)
                        .execute(&mut *tx)
                        .await?;
                }
                sqlx::query(
                    "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(order_id.as_i64())
                .bind(OrderStatus::Confirmed.as_str())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                tracing::info!(order_id = %order_id, "order confirmed");
                metrics::counter!("orders_confirmed_total").increment(1);
                Ok(Settlement::Confirmed)
            }
        }
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, user_id, status, total_amount_cents, failure_reason,
                    created_at, updated_at
             FROM orders WHERE id = $1",
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.map(order_from_row).transpose()
    }

    async fn get_order_lines(&self, order_id: OrderId) -> Result<Vec<OrderLine>> {
        let rows: Vec<(i64, i64, i64, i32, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, order_id, product_id, quantity, unit_price_cents, created_at
             FROM order_lines WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, order_id, product_id, quantity, price_cents, created_at)| OrderLine {
                id,
                order_id: OrderId::new(order_id),
                product_id: ProductId::new(product_id),
                quantity: quantity as u32,
                unit_price: Money::from_cents(price_cents),
                created_at,
            })
            .collect())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row: Option<(i64, String, i64, i32, String)> = sqlx::query_as(
            "SELECT id, name, price_cents, stock, category FROM products WHERE id = $1",
        )
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, price_cents, stock, category)| Product {
            id: ProductId::new(id),
            name,
            price: Money::from_cents(price_cents),
            stock: stock as u32,
            category,
        }))
    }

    async fn user_email(&self, user_id: UserId) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(email,)| email))
    }

    async fn pending_outbox(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        let rows: Vec<(i64, String, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, queue, payload, created_at FROM order_outbox ORDER BY id LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, queue, payload, created_at)| OutboxEntry {
                id,
                queue,
                payload,
                created_at,
            })
            .collect())
    }

    async fn delete_outbox(&self, entry_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM order_outbox WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
