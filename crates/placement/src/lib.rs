//! Order placement producer.
//!
//! Validates placement requests, creates PENDING orders with an
//! `order_placed` outbox entry in one transaction, and relays committed
//! outbox entries to the broker on a background task.

pub mod error;
pub mod relay;
pub mod service;

pub use error::{PlacementError, RelayError, Result};
pub use relay::{OutboxRelay, RelayHandle};
pub use service::PlacementService;
