//! Inventory settlement consumer.
//!
//! Subscribes to `order_placed`, runs each order through the store's
//! settlement transaction, and publishes the outcome to `order_confirmed`
//! or `order_failed`. Settlement is the single writer of order outcomes
//! and the only component that mutates stock.

pub mod consumer;
pub mod error;

pub use consumer::SettlementConsumer;
pub use error::SettlementError;
