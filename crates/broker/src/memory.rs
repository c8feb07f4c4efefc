use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};

use crate::broker::{Broker, Subscription};
use crate::handler::Handler;
use crate::{BrokerError, Result};

/// A message that exhausted its delivery budget or failed fatally.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub payload: Vec<u8>,
    pub delivery_count: u32,
    pub reason: String,
}

struct QueuedMessage {
    payload: Vec<u8>,
    delivery_count: u32,
}

struct Shared {
    queues: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    notify: Notify,
    closed: AtomicBool,
    max_deliveries: u32,
}

/// In-memory broker implementation for testing.
///
/// Provides the same delivery contract as the durable implementation:
/// prefetch = 1 per subscription, requeue-to-front on transient failure,
/// a delivery ceiling, and a dead-letter store inspectable from tests.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Shared>,
}

impl MemoryBroker {
    /// Creates a new broker with the default delivery ceiling of 5.
    pub fn new() -> Self {
        Self::with_max_deliveries(5)
    }

    /// Creates a new broker with the given delivery ceiling.
    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            inner: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                dead_letters: Mutex::new(Vec::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                max_deliveries,
            }),
        }
    }

    /// Declares the given queues. Publishing or subscribing to an
    /// undeclared queue fails.
    pub async fn declare_queues(&self, queues: &[&str]) {
        let mut map = self.inner.queues.lock().await;
        for queue in queues {
            map.entry((*queue).to_string()).or_default();
        }
    }

    /// Returns the number of messages currently waiting in a queue.
    pub async fn queue_len(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .await
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Returns a copy of the dead-lettered messages.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().await.clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let mut queues = self.inner.queues.lock().await;
        let Some(messages) = queues.get_mut(queue) else {
            return Err(BrokerError::QueueNotDeclared(queue.to_string()));
        };
        messages.push_back(QueuedMessage {
            payload: payload.to_vec(),
            delivery_count: 0,
        });
        drop(queues);

        self.inner.notify.notify_waiters();
        metrics::counter!("broker_published_total").increment(1);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn Handler>) -> Result<Subscription> {
        if !self.inner.queues.lock().await.contains_key(queue) {
            return Err(BrokerError::QueueNotDeclared(queue.to_string()));
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let queue = queue.to_string();

        let task = tokio::spawn(async move {
            loop {
                if inner.closed.load(Ordering::SeqCst) || *shutdown_rx.borrow() {
                    break;
                }

                let next = {
                    let mut queues = inner.queues.lock().await;
                    queues.get_mut(&queue).and_then(VecDeque::pop_front)
                };

                let Some(mut message) = next else {
                    tokio::select! {
                        _ = inner.notify.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                    continue;
                };

                message.delivery_count += 1;
                match handler.handle(&message.payload).await {
                    Ok(()) => {
                        metrics::counter!("broker_acked_total").increment(1);
                    }
                    Err(err) => {
                        let exhausted = message.delivery_count >= inner.max_deliveries;
                        if err.is_fatal() || exhausted {
                            tracing::warn!(
                                %queue,
                                delivery_count = message.delivery_count,
                                error = %err,
                                "dead-lettering message"
                            );
                            inner.dead_letters.lock().await.push(DeadLetter {
                                queue: queue.clone(),
                                payload: message.payload,
                                delivery_count: message.delivery_count,
                                reason: err.to_string(),
                            });
                            metrics::counter!("broker_dead_lettered_total").increment(1);
                        } else {
                            tracing::warn!(
                                %queue,
                                delivery_count = message.delivery_count,
                                error = %err,
                                "handler failed, requeueing message"
                            );
                            let mut queues = inner.queues.lock().await;
                            if let Some(messages) = queues.get_mut(&queue) {
                                messages.push_front(message);
                            }
                            metrics::counter!("broker_requeued_total").increment(1);
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(shutdown_tx, task))
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
