//! Test support
//!
//! Recording fakes for the broker-facing seams so pipeline behavior can be
//! exercised without a broker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wes_errors::{DataServiceError, Result};

use crate::amqp::Publisher;
use crate::delivery::{Acknowledger, InboundMessage};

/// One message captured by a [`RecordingPublisher`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub persistent: bool,
}

/// Publisher that records everything it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail with a transport fault.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything published so far, in submission order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        persistent: bool,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DataServiceError::transport("publish failed"));
        }
        self.published.lock().unwrap().push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            persistent,
        });
        Ok(())
    }
}

/// Observes what happened to one delivery.
#[derive(Clone, Default)]
pub struct AckProbe {
    acks: Arc<AtomicUsize>,
    rejects: Arc<AtomicUsize>,
}

impl AckProbe {
    pub fn is_acked(&self) -> bool {
        self.acks.load(Ordering::SeqCst) == 1 && self.rejects.load(Ordering::SeqCst) == 0
    }

    pub fn is_rejected(&self) -> bool {
        self.rejects.load(Ordering::SeqCst) == 1 && self.acks.load(Ordering::SeqCst) == 0
    }

    pub fn is_pending(&self) -> bool {
        self.acks.load(Ordering::SeqCst) == 0 && self.rejects.load(Ordering::SeqCst) == 0
    }

    /// Total acknowledgement operations, for exactly-once assertions.
    pub fn settled_count(&self) -> usize {
        self.acks.load(Ordering::SeqCst) + self.rejects.load(Ordering::SeqCst)
    }
}

struct RecordingAcker {
    probe: AckProbe,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> Result<()> {
        self.probe.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        self.probe.rejects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Build an inbound message whose acknowledgement outcome can be observed.
pub fn recorded_delivery(
    routing_key: &str,
    producer_uid: Option<&str>,
    producer_user: Option<&str>,
    body: Vec<u8>,
) -> (InboundMessage, AckProbe) {
    let probe = AckProbe::default();
    let delivery = InboundMessage::new(
        routing_key,
        producer_uid.map(String::from),
        producer_user.map(String::from),
        body,
        Box::new(RecordingAcker {
            probe: probe.clone(),
        }),
    );
    (delivery, probe)
}
