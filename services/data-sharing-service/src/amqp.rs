//! Broker connection, topology, and publishing

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::info;
use wes_config::AmqpConfig;
use wes_errors::Result;

/// AMQP delivery mode for transient messages.
const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// AMQP delivery mode for persistent messages.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Publish to a named exchange.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Submit one message. `persistent` selects the AMQP delivery mode:
    /// node fan-out is transient, beehive fan-out is persistent.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        persistent: bool,
    ) -> Result<()>;
}

/// Publisher over a live broker channel.
pub struct ChannelPublisher {
    channel: Channel,
}

impl ChannelPublisher {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        persistent: bool,
    ) -> Result<()> {
        let delivery_mode = if persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_delivery_mode(delivery_mode),
            )
            .await?
            .await?;

        Ok(())
    }
}

/// Open a broker connection.
pub async fn connect(config: &AmqpConfig) -> Result<Connection> {
    info!(url = %config.masked_url(), "connecting to broker");
    let connection = Connection::connect(&config.url(), ConnectionProperties::default()).await?;
    Ok(connection)
}

/// Declare the exchanges and queues the service consumes from and fans out
/// to. Everything is durable; subscribers of the node topic exchange bind
/// their own queues.
pub async fn declare_topology(channel: &Channel, config: &AmqpConfig) -> Result<()> {
    declare_exchange_with_queue(channel, &config.src_queue).await?;
    declare_exchange_with_queue(channel, &config.dst_exchange_beehive).await?;

    channel
        .exchange_declare(
            &config.dst_exchange_node,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

/// Declare a durable fanout exchange with a same-name queue bound to it.
async fn declare_exchange_with_queue(channel: &Channel, name: &str) -> Result<()> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(name, name, "", QueueBindOptions::default(), FieldTable::default())
        .await?;

    Ok(())
}
