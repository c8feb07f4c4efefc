//! Outbox relay: drains committed outbox entries into the broker.
//!
//! Publishing happens after the placement transaction commits, so a broker
//! outage can delay the `order_placed` event but never lose it. Delivery to
//! the broker is at-least-once: if the process dies between publish and
//! outbox delete, the entry is published again on restart, and settlement's
//! idempotency absorbs the duplicate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use broker::Broker;
use store::FulfillmentStore;

use crate::RelayError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_BATCH_SIZE: u32 = 32;

/// Polls the outbox and publishes each entry to its queue, deleting entries
/// only after a successful publish.
pub struct OutboxRelay {
    store: Arc<dyn FulfillmentStore>,
    broker: Arc<dyn Broker>,
    poll_interval: Duration,
    batch_size: u32,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn FulfillmentStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            store,
            broker,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Overrides the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Drains one batch of outbox entries. Returns the number published.
    ///
    /// Entries are processed in insertion order; a failure stops the batch
    /// so the failed entry is retried first on the next pass.
    pub async fn run_once(&self) -> Result<usize, RelayError> {
        let entries = self.store.pending_outbox(self.batch_size).await?;
        let mut published = 0;
        for entry in entries {
            let payload = serde_json::to_vec(&entry.payload)
                .map_err(broker::BrokerError::Serialization)?;
            self.broker.publish(&entry.queue, &payload).await?;
            self.store.delete_outbox(entry.id).await?;
            metrics::counter!("outbox_relayed_total").increment(1);
            published += 1;
        }
        Ok(published)
    }

    /// Starts the relay loop on a background task.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                if let Err(err) = self.run_once().await {
                    tracing::warn!(error = %err, "outbox relay pass failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        RelayHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running relay task.
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Signals the relay to stop and waits for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use common::{LineItem, Money, OrderPlaced, QUEUE_ORDER_PLACED, QUEUES, UserId};
    use store::{MemoryStore, Product};

    use broker::MemoryBroker;

    async fn seeded() -> (MemoryStore, MemoryBroker) {
        let store = MemoryStore::new();
        store.add_product(Product::new(1, "Widget", Money::from_cents(1000), 5, "tools"));
        let broker = MemoryBroker::new();
        broker.declare_queues(&QUEUES).await;
        (store, broker)
    }

    #[tokio::test]
    async fn run_once_publishes_and_deletes() {
        let (store, broker) = seeded().await;
        let items = vec![LineItem::new(1, 2)];
        store
            .create_pending_order(UserId::new(7), &items)
            .await
            .unwrap();

        let relay = OutboxRelay::new(Arc::new(store.clone()), Arc::new(broker.clone()));
        let published = relay.run_once().await.unwrap();

        assert_eq!(published, 1);
        assert_eq!(store.outbox_len(), 0);
        assert_eq!(broker.queue_len(QUEUE_ORDER_PLACED).await, 1);
    }

    #[tokio::test]
    async fn run_once_with_empty_outbox_is_a_noop() {
        let (store, broker) = seeded().await;

        let relay = OutboxRelay::new(Arc::new(store), Arc::new(broker));
        assert_eq!(relay.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_failure_keeps_the_entry() {
        let (store, _) = seeded().await;
        store
            .create_pending_order(UserId::new(7), &[LineItem::new(1, 1)])
            .await
            .unwrap();

        // No queues declared, so every publish fails.
        let broker = MemoryBroker::new();
        let relay = OutboxRelay::new(Arc::new(store.clone()), Arc::new(broker));

        assert!(relay.run_once().await.is_err());
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn spawned_relay_drains_outbox() {
        let (store, broker) = seeded().await;

        let relay = OutboxRelay::new(Arc::new(store.clone()), Arc::new(broker.clone()))
            .with_poll_interval(Duration::from_millis(10));
        let handle = relay.spawn();

        store
            .create_pending_order(UserId::new(7), &[LineItem::new(1, 1)])
            .await
            .unwrap();

        let mut drained = false;
        for _ in 0..100 {
            if store.outbox_len() == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(drained, "relay did not drain the outbox in time");
        assert_eq!(broker.queue_len(QUEUE_ORDER_PLACED).await, 1);
    }

    #[tokio::test]
    async fn relayed_payload_matches_placement_event() {
        let (store, broker) = seeded().await;
        let items = vec![LineItem::new(1, 3)];
        let order = store
            .create_pending_order(UserId::new(9), &items)
            .await
            .unwrap();

        let entries = store.pending_outbox(10).await.unwrap();
        let relay = OutboxRelay::new(Arc::new(store), Arc::new(broker));
        relay.run_once().await.unwrap();

        let event: OrderPlaced = serde_json::from_value(entries[0].payload.clone()).unwrap();
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.items, items);
    }
}
