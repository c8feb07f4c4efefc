use thiserror::Error;

/// Errors that can occur when interacting with the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The initial connection could not be established within the retry
    /// budget. Fatal at startup.
    #[error("failed to connect to broker after {attempts} attempts")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// The queue was not declared at connect time.
    #[error("queue not declared: {0}")]
    QueueNotDeclared(String),

    /// The broker has been closed; no further operations are possible.
    #[error("broker is closed")]
    Closed,

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A message payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
