use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::handler::Handler;
use crate::{BrokerError, Result};

/// Core trait for broker implementations.
///
/// A broker carries durable, at-least-once message delivery between the
/// producer and the consumers. All coordination between components goes
/// through queues declared at connect time; no component holds a reference
/// to another's internal state.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes a message payload durably to a queue.
    ///
    /// Returns an error if the broker is unreachable or closed. There is no
    /// built-in retry: the caller decides whether a publish failure is fatal
    /// to the surrounding operation.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Registers a handler for a queue and starts delivering messages to it.
    ///
    /// Delivery is limited to one in-flight message per subscription
    /// (prefetch = 1), preserving FIFO order within this instance. After the
    /// handler returns, the message is acknowledged on success, requeued on
    /// a transient failure (up to the delivery ceiling), or dead-lettered on
    /// a fatal failure.
    async fn subscribe(&self, queue: &str, handler: Arc<dyn Handler>) -> Result<Subscription>;

    /// Releases broker resources. Idempotent; publishing afterwards fails
    /// with [`BrokerError::Closed`].
    async fn close(&self) -> Result<()>;
}

/// Extension trait providing convenience methods for brokers.
#[async_trait]
pub trait BrokerExt: Broker {
    /// Serializes a message as JSON and publishes it.
    async fn publish_json<T: Serialize + Sync>(&self, queue: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message).map_err(BrokerError::Serialization)?;
        self.publish(queue, &payload).await
    }
}

// Blanket implementation for all Broker implementations
impl<T: Broker + ?Sized> BrokerExt for T {}

/// Handle to a running subscription.
///
/// Dropping the handle leaves the consumer task running; call
/// [`Subscription::shutdown`] to stop it and wait for the in-flight message
/// to finish.
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { shutdown, task }
    }

    /// Signals the consumer task to stop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Returns true if the consumer task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
