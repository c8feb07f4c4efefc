//! Broker configuration loaded from environment variables.

use std::time::Duration;

/// Broker connection and delivery configuration.
///
/// Reads from environment variables:
/// - `BROKER_URL`: connection string (falls back to `DATABASE_URL`)
/// - `BROKER_CONNECT_ATTEMPTS`: bounded connect retries (default: 10)
/// - `BROKER_CONNECT_DELAY_MS`: fixed delay between attempts (default: 3000)
/// - `BROKER_POLL_INTERVAL_MS`: consumer poll interval (default: 250)
/// - `BROKER_MAX_DELIVERIES`: delivery ceiling before dead-lettering (default: 5)
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_attempts: u32,
    pub connect_delay: Duration,
    pub poll_interval: Duration,
    pub max_deliveries: u32,
}

impl BrokerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let url = std::env::var("BROKER_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or_default();

        Self {
            url,
            max_connections: env_parse("BROKER_MAX_CONNECTIONS", 5),
            connect_attempts: env_parse("BROKER_CONNECT_ATTEMPTS", 10),
            connect_delay: Duration::from_millis(env_parse("BROKER_CONNECT_DELAY_MS", 3000)),
            poll_interval: Duration::from_millis(env_parse("BROKER_POLL_INTERVAL_MS", 250)),
            max_deliveries: env_parse("BROKER_MAX_DELIVERIES", 5),
        }
    }

    /// Returns a config pointing at the given connection string.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            connect_attempts: 10,
            connect_delay: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            max_deliveries: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
