//! Outcome consumers: one per outcome queue.
//!
//! Outcome events may arrive more than once (settlement republishes the
//! stored outcome on redelivery), so a duplicate email is possible and
//! accepted. Mail transport failures are transient; the message is
//! redelivered and the send retried up to the broker's delivery ceiling.

use std::sync::Arc;

use async_trait::async_trait;

use broker::{Broker, Handler, HandlerError, Subscription};
use common::{OrderConfirmed, OrderFailed, QUEUE_ORDER_CONFIRMED, QUEUE_ORDER_FAILED};
use store::FulfillmentStore;

use crate::NotificationError;
use crate::mailer::{Email, MailTransport};

/// Emails customers whose orders were confirmed.
///
/// Loads the order from the store to include the charged total, which the
/// outcome event does not carry.
pub struct ConfirmationNotifier {
    store: Arc<dyn FulfillmentStore>,
    mailer: Arc<dyn MailTransport>,
}

impl ConfirmationNotifier {
    pub fn new(store: Arc<dyn FulfillmentStore>, mailer: Arc<dyn MailTransport>) -> Self {
        Self { store, mailer }
    }

    /// Subscribes this notifier to the confirmed-outcome queue.
    pub async fn start(self, broker: Arc<dyn Broker>) -> broker::Result<Subscription> {
        broker.subscribe(QUEUE_ORDER_CONFIRMED, Arc::new(self)).await
    }
}

#[async_trait]
impl Handler for ConfirmationNotifier {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: OrderConfirmed = serde_json::from_slice(payload)
            .map_err(|err| HandlerError::fatal(NotificationError::MalformedPayload(err)))?;

        if event.user_email.is_empty() {
            tracing::warn!(order_id = %event.order_id, "no email address, skipping confirmation");
            return Ok(());
        }

        let order = self
            .store
            .get_order(event.order_id)
            .await
            .map_err(HandlerError::transient)?
            .ok_or_else(|| {
                HandlerError::fatal(NotificationError::UnknownOrder(event.order_id))
            })?;

        let email = Email {
            to: event.user_email.clone(),
            subject: format!("Order #{} confirmed", event.order_id),
            body: format!(
                "Your order #{} has been confirmed and charged {}. Thank you for shopping with us.",
                event.order_id, order.total_amount
            ),
        };
        self.mailer
            .send(email)
            .await
            .map_err(HandlerError::transient)?;

        metrics::counter!("notifications_sent_total", "kind" => "confirmation").increment(1);
        tracing::info!(order_id = %event.order_id, to = %event.user_email, "confirmation sent");
        Ok(())
    }
}

/// Emails customers whose orders could not be fulfilled.
///
/// The failure reason travels in the event itself, so no store lookup is
/// needed.
pub struct CancellationNotifier {
    mailer: Arc<dyn MailTransport>,
}

impl CancellationNotifier {
    pub fn new(mailer: Arc<dyn MailTransport>) -> Self {
        Self { mailer }
    }

    /// Subscribes this notifier to the failed-outcome queue.
    pub async fn start(self, broker: Arc<dyn Broker>) -> broker::Result<Subscription> {
        broker.subscribe(QUEUE_ORDER_FAILED, Arc::new(self)).await
    }
}

#[async_trait]
impl Handler for CancellationNotifier {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let event: OrderFailed = serde_json::from_slice(payload)
            .map_err(|err| HandlerError::fatal(NotificationError::MalformedPayload(err)))?;

        if event.user_email.is_empty() {
            tracing::warn!(order_id = %event.order_id, "no email address, skipping cancellation");
            return Ok(());
        }

        let email = Email {
            to: event.user_email.clone(),
            subject: format!("Order #{} cancelled", event.order_id),
            body: format!(
                "Unfortunately your order #{} could not be fulfilled: {}. You have not been charged.",
                event.order_id, event.reason
            ),
        };
        self.mailer
            .send(email)
            .await
            .map_err(HandlerError::transient)?;

        metrics::counter!("notifications_sent_total", "kind" => "cancellation").increment(1);
        tracing::info!(order_id = %event.order_id, to = %event.user_email, "cancellation sent");
        Ok(())
    }
}
