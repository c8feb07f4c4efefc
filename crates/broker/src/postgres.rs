use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::watch;
use uuid::Uuid;

use crate::broker::{Broker, Subscription};
use crate::config::BrokerConfig;
use crate::handler::Handler;
use crate::{BrokerError, Result};

/// DDL executed at connect time so producers and consumers started in any
/// order observe the same durable topology.
const DECLARE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS broker_queues (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS broker_messages (
    seq BIGSERIAL PRIMARY KEY,
    message_id UUID NOT NULL,
    queue TEXT NOT NULL REFERENCES broker_queues (name),
    payload BYTEA NOT NULL,
    delivery_count INT NOT NULL DEFAULT 0,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_broker_messages_queue_seq
    ON broker_messages (queue, seq);

CREATE TABLE IF NOT EXISTS broker_dead_letters (
    seq BIGSERIAL PRIMARY KEY,
    message_id UUID NOT NULL,
    queue TEXT NOT NULL,
    payload BYTEA NOT NULL,
    delivery_count INT NOT NULL,
    reason TEXT NOT NULL,
    failed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

/// Durable broker backed by the relational store.
///
/// Messages are rows; a consumer claims the oldest row in its queue with
/// `FOR UPDATE SKIP LOCKED`, holding the claim transaction open while the
/// handler runs. A crash before commit releases the claim, so delivery is
/// at-least-once. Multiple instances consuming the same queue skip each
/// other's claims.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    config: BrokerConfig,
}

impl PostgresBroker {
    /// Dials the broker with bounded retries, then declares every queue
    /// durably. On retry exhaustion returns [`BrokerError::ConnectFailed`].
    pub async fn connect(config: &BrokerConfig, queues: &[&str]) -> Result<Self> {
        let mut attempt = 0;
        let pool = loop {
            attempt += 1;
            match PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
                .await
            {
                Ok(pool) => break pool,
                Err(err) if attempt < config.connect_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = config.connect_attempts,
                        error = %err,
                        "broker connect failed, retrying"
                    );
                    tokio::time::sleep(config.connect_delay).await;
                }
                Err(err) => {
                    return Err(BrokerError::ConnectFailed {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        };

        let broker = Self::from_pool(pool, config.clone());
        broker.declare_queues(queues).await?;
        tracing::info!(?queues, "broker connected, queues declared");
        Ok(broker)
    }

    /// Creates a broker over an existing pool. Queues must still be
    /// declared before use.
    pub fn from_pool(pool: PgPool, config: BrokerConfig) -> Self {
        Self { pool, config }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the broker tables if absent and registers each queue name.
    pub async fn declare_queues(&self, queues: &[&str]) -> Result<()> {
        sqlx::raw_sql(DECLARE_SQL).execute(&self.pool).await?;
        for queue in queues {
            sqlx::query("INSERT INTO broker_queues (name) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(queue)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Returns the number of messages waiting in a queue.
    pub async fn queue_depth(&self, queue: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM broker_messages WHERE queue = $1")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Returns the number of dead-lettered messages for a queue.
    pub async fn dead_letter_count(&self, queue: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM broker_dead_letters WHERE queue = $1")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// Claims and processes at most one message. Returns true if a message was
/// handled (acknowledged or dead-lettered), false if the queue was empty or
/// the message was requeued and the caller should back off.
async fn deliver_next(
    pool: &PgPool,
    queue: &str,
    handler: &dyn Handler,
    max_deliveries: u32,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT seq, message_id, payload, delivery_count
        FROM broker_messages
        WHERE queue = $1
        ORDER BY seq
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(queue)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Ok(false);
    };

    let seq: i64 = row.try_get("seq")?;
    let message_id: Uuid = row.try_get("message_id")?;
    let payload: Vec<u8> = row.try_get("payload")?;
    let delivery_count: i32 = row.try_get("delivery_count")?;
    let attempt = delivery_count as u32 + 1;

    match handler.handle(&payload).await {
        Ok(()) => {
            sqlx::query("DELETE FROM broker_messages WHERE seq = $1")
                .bind(seq)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            metrics::counter!("broker_acked_total").increment(1);
            tracing::debug!(%queue, %message_id, "message acknowledged");
            Ok(true)
        }
        Err(err) if err.is_fatal() || attempt >= max_deliveries => {
            sqlx::query(
                r#"
                INSERT INTO broker_dead_letters
                    (message_id, queue, payload, delivery_count, reason)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(message_id)
            .bind(queue)
            .bind(&payload)
            .bind(attempt as i32)
            .bind(err.to_string())
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM broker_messages WHERE seq = $1")
                .bind(seq)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            metrics::counter!("broker_dead_lettered_total").increment(1);
            tracing::warn!(
                %queue,
                %message_id,
                delivery_count = attempt,
                error = %err,
                "dead-lettering message"
            );
            Ok(true)
        }
        Err(err) => {
            sqlx::query("UPDATE broker_messages SET delivery_count = $1 WHERE seq = $2")
                .bind(attempt as i32)
                .bind(seq)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            metrics::counter!("broker_requeued_total").increment(1);
            tracing::warn!(
                %queue,
                %message_id,
                delivery_count = attempt,
                error = %err,
                "handler failed, message requeued"
            );
            Ok(false)
        }
    }
}

#[async_trait]
impl Broker for PostgresBroker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        if self.pool.is_closed() {
            return Err(BrokerError::Closed);
        }

        sqlx::query("INSERT INTO broker_messages (message_id, queue, payload) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(queue)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    BrokerError::QueueNotDeclared(queue.to_string())
                }
                sqlx::Error::PoolClosed => BrokerError::Closed,
                other => BrokerError::Database(other),
            })?;

        metrics::counter!("broker_published_total").increment(1);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn Handler>) -> Result<Subscription> {
        let declared: Option<i32> = sqlx::query_scalar("SELECT 1 FROM broker_queues WHERE name = $1")
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;
        if declared.is_none() {
            return Err(BrokerError::QueueNotDeclared(queue.to_string()));
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let pool = self.pool.clone();
        let queue = queue.to_string();
        let poll_interval = self.config.poll_interval;
        let max_deliveries = self.config.max_deliveries;

        let task = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() || pool.is_closed() {
                    break;
                }

                let idle = match deliver_next(&pool, &queue, handler.as_ref(), max_deliveries).await
                {
                    Ok(handled) => !handled,
                    Err(err) => {
                        if pool.is_closed() {
                            break;
                        }
                        tracing::warn!(%queue, error = %err, "broker delivery loop error");
                        true
                    }
                };

                if idle {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(shutdown_tx, task))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
