//! Settlement consumer: turns placement events into order outcomes.

use std::sync::Arc;

use async_trait::async_trait;

use broker::{Broker, BrokerExt, Handler, HandlerError, Subscription};
use common::{
    OrderConfirmed, OrderFailed, OrderPlaced, QUEUE_ORDER_CONFIRMED, QUEUE_ORDER_FAILED,
    QUEUE_ORDER_PLACED, UserId,
};
use store::{FulfillmentStore, OrderStatus, Settlement, StoreError};

use crate::SettlementError;

const FALLBACK_FAILURE_REASON: &str = "order could not be fulfilled";

/// Consumes `order_placed` messages, runs the settlement transaction, and
/// publishes exactly one outcome event per order.
///
/// Settlement commits before the outcome is published. If the publish then
/// fails, the message is redelivered, the store reports the order as
/// already settled, and the stored outcome is published again. Consumers
/// of outcome events must therefore tolerate duplicates; the order state
/// itself is settled exactly once.
pub struct SettlementConsumer {
    store: Arc<dyn FulfillmentStore>,
    broker: Arc<dyn Broker>,
}

impl SettlementConsumer {
    pub fn new(store: Arc<dyn FulfillmentStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Subscribes this consumer to the placement queue.
    pub async fn start(self) -> broker::Result<Subscription> {
        let broker = Arc::clone(&self.broker);
        broker.subscribe(QUEUE_ORDER_PLACED, Arc::new(self)).await
    }

    async fn lookup_email(&self, user_id: UserId) -> Result<String, HandlerError> {
        match self.store.user_email(user_id).await {
            Ok(Some(email)) => Ok(email),
            Ok(None) => {
                tracing::warn!(user_id = %user_id, "no email on record for user");
                Ok(String::new())
            }
            Err(err) => Err(HandlerError::transient(err)),
        }
    }

    async fn publish_confirmed(&self, event: &OrderPlaced, email: String) -> Result<(), HandlerError> {
        let outcome = OrderConfirmed::new(event.order_id, event.user_id, email);
        self.broker
            .publish_json(QUEUE_ORDER_CONFIRMED, &outcome)
            .await
            .map_err(|err| {
                tracing::warn!(order_id = %event.order_id, error = %err, "outcome publish failed");
                HandlerError::transient(err)
            })
    }

    async fn publish_failed(
        &self,
        event: &OrderPlaced,
        email: String,
        reason: String,
    ) -> Result<(), HandlerError> {
        let outcome = OrderFailed::new(event.order_id, event.user_id, email, reason);
        self.broker
            .publish_json(QUEUE_ORDER_FAILED, &outcome)
            .await
            .map_err(|err| {
                tracing::warn!(order_id = %event.order_id, error = %err, "outcome publish failed");
                HandlerError::transient(err)
            })
    }
}

#[async_trait]
impl Handler for SettlementConsumer {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: OrderPlaced = serde_json::from_slice(payload)
            .map_err(|err| HandlerError::fatal(SettlementError::MalformedPayload(err)))?;

        let settlement = self
            .store
            .settle_order(event.order_id, &event.items)
            .await
            .map_err(|err| match err {
                StoreError::OrderNotFound(id) => {
                    HandlerError::fatal(SettlementError::UnknownOrder(id))
                }
                other => HandlerError::transient(other),
            })?;

        let email = self.lookup_email(event.user_id).await?;

        match settlement {
            Settlement::Confirmed => {
                metrics::counter!("settlement_processed_total", "outcome" => "confirmed")
                    .increment(1);
                self.publish_confirmed(&event, email).await
            }
            Settlement::Cancelled { reason } => {
                metrics::counter!("settlement_processed_total", "outcome" => "cancelled")
                    .increment(1);
                self.publish_failed(&event, email, reason).await
            }
            Settlement::AlreadySettled { status, reason } => {
                // Redelivered message. Nothing was mutated; re-emit the
                // stored outcome in case the original publish never landed.
                metrics::counter!("settlement_processed_total", "outcome" => "duplicate")
                    .increment(1);
                tracing::info!(
                    order_id = %event.order_id,
                    %status,
                    "duplicate placement message, republishing outcome"
                );
                match status {
                    OrderStatus::Confirmed => self.publish_confirmed(&event, email).await,
                    OrderStatus::Cancelled | OrderStatus::Failed => {
                        let reason = reason.unwrap_or_else(|| FALLBACK_FAILURE_REASON.to_string());
                        self.publish_failed(&event, email, reason).await
                    }
                    OrderStatus::Pending => Err(HandlerError::transient(
                        "order reported settled while still pending",
                    )),
                }
            }
        }
    }
}
