//! Message handler trait and failure classification.

use async_trait::async_trait;
use thiserror::Error;

/// Boxed error carried by a handler failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A handler failure, classified by what the broker should do with the
/// message afterwards.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The failure may resolve on retry (connection loss, lock timeout).
    /// The message is requeued, up to the configured delivery ceiling.
    #[error("transient handler failure: {0}")]
    Transient(#[source] BoxError),

    /// The message can never be processed successfully (malformed payload,
    /// reference to a missing order). It is dead-lettered immediately
    /// instead of being redelivered forever.
    #[error("fatal handler failure: {0}")]
    Fatal(#[source] BoxError),
}

impl HandlerError {
    /// Wraps an error as transient.
    pub fn transient(err: impl Into<BoxError>) -> Self {
        Self::Transient(err.into())
    }

    /// Wraps an error as fatal.
    pub fn fatal(err: impl Into<BoxError>) -> Self {
        Self::Fatal(err.into())
    }

    /// Returns true if the message should be dead-lettered without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A message handler invoked once per delivered message.
///
/// Returning `Ok(())` acknowledges the message, permanently removing it
/// from the queue. Returning an error rejects it; see [`HandlerError`] for
/// the redelivery semantics.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> std::result::Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let t = HandlerError::transient("connection reset");
        let f = HandlerError::fatal("unparseable payload");
        assert!(!t.is_fatal());
        assert!(f.is_fatal());
    }

    #[test]
    fn display_includes_cause() {
        let err = HandlerError::transient("lock timeout");
        assert!(err.to_string().contains("transient"));
    }
}
