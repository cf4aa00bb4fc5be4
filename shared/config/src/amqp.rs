//! RabbitMQ connection and topology configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Broker connection and topology settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AmqpConfig {
    /// Broker host
    #[validate(length(min = 1))]
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Username for the service account
    #[validate(length(min = 1))]
    pub username: String,

    /// Password for the service account
    pub password: String,

    /// Queue carrying validated plugin messages into the service
    #[validate(length(min = 1))]
    pub src_queue: String,

    /// Fanout exchange for cloud-bound messages
    #[validate(length(min = 1))]
    pub dst_exchange_beehive: String,

    /// Topic exchange for node-local subscribers
    #[validate(length(min = 1))]
    pub dst_exchange_node: String,

    /// Seconds to wait before reconnecting after a broker fault
    #[validate(range(min = 1))]
    pub reconnect_interval: u64,
}

impl AmqpConfig {
    /// Get the AMQP connection URL.
    pub fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.username, self.password, self.host, self.port
        )
    }

    /// Get the connection URL with the password masked for logging.
    pub fn masked_url(&self) -> String {
        format!("amqp://{}:***@{}:{}/%2f", self.username, self.host, self.port)
    }

    /// Get the reconnect interval as a Duration.
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            host: "rabbitmq-server".to_string(),
            port: 5672,
            username: "service".to_string(),
            password: "service".to_string(),
            src_queue: "to-validator".to_string(),
            dst_exchange_beehive: "to-beehive".to_string(),
            dst_exchange_node: "data.topic".to_string(),
            reconnect_interval: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology() {
        let config = AmqpConfig::default();
        assert_eq!(config.src_queue, "to-validator");
        assert_eq!(config.dst_exchange_beehive, "to-beehive");
        assert_eq!(config.dst_exchange_node, "data.topic");
    }

    #[test]
    fn test_masked_url() {
        let mut config = AmqpConfig::default();
        config.password = "hunter2".to_string();
        let masked = config.masked_url();
        assert!(masked.contains("***"));
        assert!(!masked.contains("hunter2"));
        assert!(config.url().contains("hunter2"));
    }
}
