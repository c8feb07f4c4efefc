use thiserror::Error;

use common::ProductId;
use store::StoreError;

/// Errors returned to the caller of order placement.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The request carried no line items.
    #[error("order must contain at least one item")]
    EmptyOrder,

    /// A line item requested a quantity of zero.
    #[error("invalid quantity for product {0}: must be at least 1")]
    InvalidQuantity(ProductId),

    /// A referenced product does not exist in the catalog.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// The store rejected the operation.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PlacementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(id) => Self::ProductNotFound(id),
            other => Self::Store(other),
        }
    }
}

/// Errors from the outbox relay loop.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Reading or deleting outbox entries failed.
    #[error("outbox store error: {0}")]
    Store(#[from] StoreError),

    /// Publishing an entry to the broker failed.
    #[error("outbox publish error: {0}")]
    Broker(#[from] broker::BrokerError),
}

/// Result type for placement operations.
pub type Result<T, E = PlacementError> = std::result::Result<T, E>;
