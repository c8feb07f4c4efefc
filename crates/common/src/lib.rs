//! Shared types for the order fulfillment system.
//!
//! Identifier newtypes, the [`Money`] value object, queue names, and the
//! three message payloads exchanged over the broker.

pub mod messages;
pub mod money;
pub mod types;

pub use messages::{
    LineItem, OrderConfirmed, OrderFailed, OrderPlaced, QUEUE_ORDER_CONFIRMED, QUEUE_ORDER_FAILED,
    QUEUE_ORDER_PLACED, QUEUES,
};
pub use money::Money;
pub use types::{OrderId, ProductId, UserId};
