//! Inbound deliveries and their acknowledgement handles

use async_trait::async_trait;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use wes_errors::Result;

/// Acknowledgement handle for one delivery.
///
/// The handler owns each delivery from receipt until exactly one of `ack` or
/// `reject` has been issued. Rejects never requeue; a redelivered data-plane
/// failure would only fail again.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn reject(&self) -> Result<()>;
}

/// Acknowledger backed by the broker channel the delivery arrived on.
pub struct ChannelAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for ChannelAcker {
    async fn ack(&self) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await?;
        Ok(())
    }
}

/// One message received from the broker.
pub struct InboundMessage {
    /// Routing key the producer published with; names the publish scope.
    pub routing_key: String,
    /// Producer UID from the `app_id` property.
    pub producer_uid: Option<String>,
    /// Broker-authenticated username from the `user_id` property.
    pub producer_user: Option<String>,
    /// Raw envelope bytes.
    pub body: Vec<u8>,

    acker: Box<dyn Acknowledger>,
}

impl InboundMessage {
    pub fn new(
        routing_key: impl Into<String>,
        producer_uid: Option<String>,
        producer_user: Option<String>,
        body: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            producer_uid,
            producer_user,
            body,
            acker,
        }
    }

    /// Adopt a broker delivery, taking over its acknowledgement handle.
    pub fn from_delivery(delivery: Delivery) -> Self {
        let producer_uid = delivery
            .properties
            .app_id()
            .as_ref()
            .map(|s| s.as_str().to_string());
        let producer_user = delivery
            .properties
            .user_id()
            .as_ref()
            .map(|s| s.as_str().to_string());

        Self {
            routing_key: delivery.routing_key.as_str().to_string(),
            producer_uid,
            producer_user,
            body: delivery.data,
            acker: Box::new(ChannelAcker {
                acker: delivery.acker,
            }),
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(&self) -> Result<()> {
        self.acker.reject().await
    }

    /// Truncated, lossy rendering of the body for log lines.
    pub fn body_preview(&self) -> String {
        const PREVIEW_LEN: usize = 64;
        let end = self.body.len().min(PREVIEW_LEN);
        let mut preview = String::from_utf8_lossy(&self.body[..end]).into_owned();
        if self.body.len() > PREVIEW_LEN {
            preview.push_str("...");
        }
        preview
    }
}
