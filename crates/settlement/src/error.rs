use thiserror::Error;

use common::OrderId;

/// Terminal settlement failures. These dead-letter the message: no amount
/// of redelivery can make the payload parseable or the order appear.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The placement payload could not be decoded.
    #[error("malformed placement payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The payload references an order the store has never seen.
    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),
}
