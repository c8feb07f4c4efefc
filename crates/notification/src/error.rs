use thiserror::Error;

use common::OrderId;

/// Terminal notification failures that dead-letter the outcome message.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The outcome payload could not be decoded.
    #[error("malformed outcome payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The outcome references an order the store has never seen.
    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),
}
