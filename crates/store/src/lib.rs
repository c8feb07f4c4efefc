//! Relational store layer for the order fulfillment system.
//!
//! The store owns durable truth for orders, order lines, and product stock.
//! Its central operation is [`FulfillmentStore::settle_order`]: one
//! transaction that locks every referenced product row, validates all line
//! items, and either decrements stock and confirms the order or cancels it
//! with a recorded reason. All-or-nothing: never a partial decrement.
//!
//! Two implementations share the contract: [`MemoryStore`] for tests and
//! [`PostgresStore`] over a bounded `sqlx` pool.

pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod product;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use order::{Order, OrderLine, OrderStatus};
pub use postgres::PostgresStore;
pub use product::Product;
pub use store::{FulfillmentStore, OutboxEntry, Settlement};
