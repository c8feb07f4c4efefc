//! PostgreSQL broker integration tests
//!
//! One container is shared across the file; each test truncates the broker
//! tables, so tests are serialized.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::{Mutex, OnceCell};

use broker::{Broker, BrokerConfig, Handler, HandlerError, PostgresBroker};

const TEST_QUEUES: [&str; 2] = ["orders", "outcomes"];

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn get_test_broker() -> PostgresBroker {
    init_tracing();
    let info = get_container_info().await;

    let mut config = BrokerConfig::for_url(&info.connection_string);
    config.poll_interval = Duration::from_millis(25);
    config.max_deliveries = 3;

    let broker = PostgresBroker::connect(&config, &TEST_QUEUES).await.unwrap();

    sqlx::query("TRUNCATE TABLE broker_messages, broker_dead_letters")
        .execute(broker.pool())
        .await
        .unwrap();

    broker
}

struct Recording {
    messages: Mutex<Vec<Vec<u8>>>,
}

impl Recording {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
        })
    }

    async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }
}

#[async_trait]
impl Handler for Recording {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        self.messages.lock().await.push(payload.to_vec());
        Ok(())
    }
}

/// Fails the first `failures` deliveries with a transient error.
struct FailFirst {
    failures: u32,
    attempts: Mutex<u32>,
}

impl FailFirst {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: Mutex::new(0),
        })
    }

    async fn attempts(&self) -> u32 {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl Handler for FailFirst {
    async fn handle(&self, _payload: &[u8]) -> Result<(), HandlerError> {
        let mut attempts = self.attempts.lock().await;
        *attempts += 1;
        if *attempts <= self.failures {
            Err(HandlerError::transient("simulated outage"))
        } else {
            Ok(())
        }
    }
}

struct AlwaysFatal;

#[async_trait]
impl Handler for AlwaysFatal {
    async fn handle(&self, _payload: &[u8]) -> Result<(), HandlerError> {
        Err(HandlerError::fatal("unprocessable payload"))
    }
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
#[serial]
async fn publish_then_consume_in_order() {
    let broker = get_test_broker().await;

    broker.publish("orders", b"first").await.unwrap();
    broker.publish("orders", b"second").await.unwrap();
    assert_eq!(broker.queue_depth("orders").await.unwrap(), 2);

    let recording = Recording::new();
    let sub = broker.subscribe("orders", recording.clone()).await.unwrap();

    wait_until(|| {
        let recording = recording.clone();
        async move { recording.len().await == 2 }
    })
    .await;
    sub.shutdown().await;

    let messages = recording.messages.lock().await.clone();
    assert_eq!(messages[0], b"first");
    assert_eq!(messages[1], b"second");
    assert_eq!(broker.queue_depth("orders").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn publish_to_undeclared_queue_fails() {
    let broker = get_test_broker().await;

    let err = broker.publish("nonexistent", b"x").await.unwrap_err();
    assert!(matches!(err, broker::BrokerError::QueueNotDeclared(name) if name == "nonexistent"));
}

#[tokio::test]
#[serial]
async fn subscribe_to_undeclared_queue_fails() {
    let broker = get_test_broker().await;

    let result = broker.subscribe("nonexistent", Recording::new()).await;
    assert!(matches!(
        result,
        Err(broker::BrokerError::QueueNotDeclared(_))
    ));
}

#[tokio::test]
#[serial]
async fn transient_failure_redelivers_until_success() {
    let broker = get_test_broker().await;
    broker.publish("orders", b"retry me").await.unwrap();

    let handler = FailFirst::new(2);
    let sub = broker.subscribe("orders", handler.clone()).await.unwrap();

    wait_until(|| {
        let broker = broker.clone();
        async move { broker.queue_depth("orders").await.unwrap() == 0 }
    })
    .await;
    sub.shutdown().await;

    assert_eq!(handler.attempts().await, 3);
    assert_eq!(broker.dead_letter_count("orders").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn delivery_ceiling_dead_letters_poison_messages() {
    let broker = get_test_broker().await;
    broker.publish("orders", b"poison").await.unwrap();

    // Ceiling is 3; this handler never succeeds.
    let handler = FailFirst::new(u32::MAX);
    let sub = broker.subscribe("orders", handler.clone()).await.unwrap();

    wait_until(|| {
        let broker = broker.clone();
        async move { broker.dead_letter_count("orders").await.unwrap() == 1 }
    })
    .await;
    sub.shutdown().await;

    assert_eq!(handler.attempts().await, 3);
    assert_eq!(broker.queue_depth("orders").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn fatal_failure_dead_letters_immediately() {
    let broker = get_test_broker().await;
    broker.publish("orders", b"malformed").await.unwrap();

    let sub = broker.subscribe("orders", Arc::new(AlwaysFatal)).await.unwrap();

    wait_until(|| {
        let broker = broker.clone();
        async move { broker.dead_letter_count("orders").await.unwrap() == 1 }
    })
    .await;
    sub.shutdown().await;

    assert_eq!(broker.queue_depth("orders").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn queues_are_isolated() {
    let broker = get_test_broker().await;

    broker.publish("orders", b"an order").await.unwrap();
    broker.publish("outcomes", b"an outcome").await.unwrap();

    let recording = Recording::new();
    let sub = broker
        .subscribe("outcomes", recording.clone())
        .await
        .unwrap();

    wait_until(|| {
        let recording = recording.clone();
        async move { recording.len().await == 1 }
    })
    .await;
    sub.shutdown().await;

    let messages = recording.messages.lock().await.clone();
    assert_eq!(messages[0], b"an outcome");
    assert_eq!(broker.queue_depth("orders").await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn messages_survive_broker_restart() {
    let info = get_container_info().await;
    let mut config = BrokerConfig::for_url(&info.connection_string);
    config.poll_interval = Duration::from_millis(25);

    {
        let broker = get_test_broker().await;
        broker.publish("orders", b"durable").await.unwrap();
        broker.close().await.unwrap();
    }

    // A new connection sees the message published before the restart.
    let broker = PostgresBroker::connect(&config, &TEST_QUEUES).await.unwrap();
    assert_eq!(broker.queue_depth("orders").await.unwrap(), 1);

    let recording = Recording::new();
    let sub = broker.subscribe("orders", recording.clone()).await.unwrap();
    wait_until(|| {
        let recording = recording.clone();
        async move { recording.len().await == 1 }
    })
    .await;
    sub.shutdown().await;
}

#[tokio::test]
#[serial]
async fn close_is_idempotent_and_stops_publishing() {
    let broker = get_test_broker().await;

    broker.close().await.unwrap();
    broker.close().await.unwrap();

    let err = broker.publish("orders", b"late").await.unwrap_err();
    assert!(matches!(err, broker::BrokerError::Closed));
}
