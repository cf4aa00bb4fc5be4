//! Per-delivery state machine
//!
//! Each delivery is validated, decoded, bound to application metadata,
//! enriched, fanned out, and then acknowledged. Data-plane failures resolve
//! to reject-and-count; broker faults propagate so the supervisor can tear
//! the connection down and rebuild it.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, warn};
use wes_cache::{AppMeta, AppMetaCache};
use wes_config::Settings;
use wes_errors::{DataServiceError, Result};
use wes_message::{decode, encode, Message, MetaMap, Scope};
use wes_metrics::DataServiceMetrics;

use crate::amqp::Publisher;
use crate::backlog::BacklogEngine;
use crate::delivery::InboundMessage;
use crate::enrich;
use crate::pod_events::{app_meta_for_pod, PodEvent};

/// Settings the pipeline needs per delivery, distilled from [`Settings`].
pub struct PipelineConfig {
    pub upload_publish_name: String,
    pub system_users: HashSet<String>,
    pub system_meta: MetaMap,
    pub node_exchange: String,
    pub beehive_exchange: String,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut system_meta = MetaMap::new();
        system_meta.insert("node".to_string(), settings.system.node.clone());
        system_meta.insert("vsn".to_string(), settings.system.vsn.clone());

        Self {
            upload_publish_name: settings.upload_publish_name.clone(),
            system_users: settings.system_users.clone(),
            system_meta,
            node_exchange: settings.amqp.dst_exchange_node.clone(),
            beehive_exchange: settings.amqp.dst_exchange_beehive.clone(),
        }
    }
}

/// Strategy for resolving application metadata from a producer UID.
pub enum MetadataBinding {
    /// Point-read against the app-metadata cache. A miss rejects: producers
    /// are expected to register before publishing.
    Cache(AppMetaCache),
    /// Deliveries wait in a per-pod backlog until the pod event stream binds
    /// their metadata.
    Backlog(BacklogEngine),
    /// Fixed lookup table, used by tests and local tooling.
    Fixed(HashMap<String, AppMeta>),
}

impl MetadataBinding {
    /// Drop parked deliveries whose acknowledgement handles died with the
    /// broker connection. Returns how many were dropped.
    pub fn clear_backlogs(&mut self) -> usize {
        match self {
            MetadataBinding::Backlog(engine) => engine.clear_backlogs(),
            _ => 0,
        }
    }
}

/// The enrichment and fan-out engine.
pub struct MessageHandler<'a, P: Publisher> {
    publisher: P,
    binding: &'a mut MetadataBinding,
    config: &'a PipelineConfig,
    metrics: &'a DataServiceMetrics,
}

impl<'a, P: Publisher> MessageHandler<'a, P> {
    pub fn new(
        publisher: P,
        binding: &'a mut MetadataBinding,
        config: &'a PipelineConfig,
        metrics: &'a DataServiceMetrics,
    ) -> Self {
        Self {
            publisher,
            binding,
            config,
            metrics,
        }
    }

    /// Consume exactly one delivery.
    ///
    /// Exactly one of ack or reject is issued before this returns `Ok`,
    /// except under the backlog binding, where an unbound delivery is parked
    /// and settled later by [`handle_pod_event`](Self::handle_pod_event) or
    /// an expiry sweep. An `Err` is a broker fault; the delivery stays
    /// unacked and the broker will redeliver it.
    pub async fn handle_delivery(&mut self, delivery: InboundMessage) -> Result<()> {
        self.metrics.messages_total.inc();

        let is_system = delivery
            .producer_user
            .as_deref()
            .map(|user| self.config.system_users.contains(user))
            .unwrap_or(false);

        if delivery.producer_uid.is_none() && !is_system {
            return reject(self.metrics, delivery, &DataServiceError::UnidentifiedProducer).await;
        }

        let msg = match decode(&delivery.body) {
            Ok(msg) => msg,
            Err(e) => {
                let err = DataServiceError::MalformedEnvelope {
                    reason: e.to_string(),
                };
                return reject(self.metrics, delivery, &err).await;
            }
        };

        let app_meta = if is_system {
            // Trusted system producers carry their own metadata.
            None
        } else {
            let Some(uid) = delivery.producer_uid.clone() else {
                return reject(self.metrics, delivery, &DataServiceError::UnidentifiedProducer)
                    .await;
            };

            match &mut *self.binding {
                MetadataBinding::Cache(cache) => match cache.get(&uid).await {
                    Ok(Some(meta)) => Some(meta),
                    Ok(None) => {
                        let err = DataServiceError::UnknownApplication { uid };
                        return reject(self.metrics, delivery, &err).await;
                    }
                    Err(e) => {
                        warn!(uid = %uid, error = %e, "app meta lookup failed");
                        let err = DataServiceError::UnknownApplication { uid };
                        return reject(self.metrics, delivery, &err).await;
                    }
                },
                MetadataBinding::Backlog(engine) => {
                    let now = Instant::now();
                    match engine.lookup(&uid, now) {
                        Some(meta) => Some(meta),
                        None => {
                            engine.push(&uid, delivery, msg, now);
                            self.metrics.messages_backlogged_total.inc();
                            self.metrics
                                .messages_in_backlog
                                .set(engine.message_count() as i64);
                            self.metrics.pods_in_backlog.set(engine.pod_count() as i64);
                            return Ok(());
                        }
                    }
                }
                MetadataBinding::Fixed(table) => match table.get(&uid) {
                    Some(meta) => Some(meta.clone()),
                    None => {
                        let err = DataServiceError::UnknownApplication { uid };
                        return reject(self.metrics, delivery, &err).await;
                    }
                },
            }
        };

        self.publish_and_ack(delivery, msg, app_meta.as_ref()).await
    }

    /// Bind metadata from a pod assignment and flush that pod's backlog in
    /// arrival order.
    pub async fn handle_pod_event(&mut self, pod: &PodEvent) -> Result<()> {
        let meta = app_meta_for_pod(pod);
        debug!(uid = %pod.uid, host = %pod.host, "pod metadata bound");

        let flushed = match &mut *self.binding {
            MetadataBinding::Backlog(engine) => engine.bind(&pod.uid, meta.clone(), Instant::now()),
            _ => Vec::new(),
        };

        for (delivery, msg) in flushed {
            self.publish_and_ack(delivery, msg, Some(&meta)).await?;
        }

        self.update_backlog_gauges();
        Ok(())
    }

    /// Reject backlogged deliveries whose pod never bound metadata and drop
    /// idle pod state. `now` comes from the periodic timer.
    pub async fn sweep_expired(&mut self, now: Instant) -> Result<()> {
        let outcome = match &mut *self.binding {
            MetadataBinding::Backlog(engine) => engine.sweep(now),
            _ => return Ok(()),
        };

        if outcome.pods_expired > 0 {
            self.metrics
                .pods_expired_total
                .inc_by(outcome.pods_expired as u64);
        }

        for (uid, delivery, _msg) in outcome.expired {
            self.metrics.messages_expired_total.inc();
            let err = DataServiceError::UnknownApplication { uid };
            reject(self.metrics, delivery, &err).await?;
        }

        self.update_backlog_gauges();
        Ok(())
    }

    /// Steps shared by the direct path and the backlog flush: merge, rewrite
    /// uploads, fan out to the scoped sinks, acknowledge.
    async fn publish_and_ack(
        &self,
        delivery: InboundMessage,
        mut msg: Message,
        app_meta: Option<&AppMeta>,
    ) -> Result<()> {
        msg.meta = enrich::merge_meta(&msg.meta, app_meta, &self.config.system_meta);

        if msg.name == self.config.upload_publish_name {
            msg = match enrich::rewrite_upload(msg) {
                Ok(msg) => msg,
                Err(err) => return reject(self.metrics, delivery, &err).await,
            };
        }

        let Some(scope) = Scope::parse(&delivery.routing_key) else {
            let err = DataServiceError::UnknownScope {
                routing_key: delivery.routing_key.clone(),
            };
            return reject(self.metrics, delivery, &err).await;
        };

        let body = encode(&msg);

        if scope.publishes_node() {
            self.publisher
                .publish(&self.config.node_exchange, &msg.name, &body, false)
                .await?;
            self.metrics.messages_published_node_total.inc();
        }

        if scope.publishes_beehive() {
            self.publisher
                .publish(&self.config.beehive_exchange, &msg.name, &body, true)
                .await?;
            self.metrics.messages_published_beehive_total.inc();
        }

        debug!(name = %msg.name, scope = %scope, "published");
        delivery.ack().await
    }

    fn update_backlog_gauges(&self) {
        if let MetadataBinding::Backlog(engine) = &*self.binding {
            self.metrics
                .messages_in_backlog
                .set(engine.message_count() as i64);
            self.metrics.pods_in_backlog.set(engine.pod_count() as i64);
        }
    }
}

/// Reject a delivery, count it, and log why.
async fn reject(
    metrics: &DataServiceMetrics,
    delivery: InboundMessage,
    err: &DataServiceError,
) -> Result<()> {
    metrics.messages_rejected_total.inc();
    warn!(
        reason = err.reason(),
        error = %err,
        body = %delivery.body_preview(),
        "rejecting delivery"
    );
    delivery.reject().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{recorded_delivery, RecordingPublisher};
    use wes_message::Value;

    fn config() -> PipelineConfig {
        let mut settings = Settings::default();
        settings.system.node = "0000000000000001".to_string();
        settings.system.vsn = "W001".to_string();
        settings.system_users.insert("service".to_string());
        PipelineConfig::from_settings(&settings)
    }

    fn encoded(name: &str, value: i64) -> Vec<u8> {
        encode(&Message::new(name, value, 1_600_000_000_000_000_000))
    }

    #[tokio::test]
    async fn test_system_user_skips_metadata_lookup() {
        let publisher = RecordingPublisher::new();
        let mut binding = MetadataBinding::Fixed(HashMap::new());
        let config = config();
        let metrics = DataServiceMetrics::new().unwrap();
        let mut handler =
            MessageHandler::new(publisher.clone(), &mut binding, &config, &metrics);

        let (delivery, probe) = recorded_delivery(
            "node",
            None,
            Some("service"),
            encoded("sys.uptime", 12345),
        );
        handler.handle_delivery(delivery).await.unwrap();

        assert!(probe.is_acked());
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "data.topic");
        assert_eq!(published[0].routing_key, "sys.uptime");
        assert!(!published[0].persistent);

        let sent = decode(&published[0].body).unwrap();
        assert_eq!(sent.meta.get("node").map(String::as_str), Some("0000000000000001"));
        assert_eq!(sent.meta.get("vsn").map(String::as_str), Some("W001"));
    }

    #[tokio::test]
    async fn test_unidentified_producer_is_rejected() {
        let publisher = RecordingPublisher::new();
        let mut binding = MetadataBinding::Fixed(HashMap::new());
        let config = config();
        let metrics = DataServiceMetrics::new().unwrap();
        let mut handler =
            MessageHandler::new(publisher.clone(), &mut binding, &config, &metrics);

        let (delivery, probe) = recorded_delivery("node", None, Some("plugin"), encoded("test", 1));
        handler.handle_delivery(delivery).await.unwrap();

        assert!(probe.is_rejected());
        assert!(publisher.published().is_empty());
        assert_eq!(metrics.messages_total.get(), 1);
        assert_eq!(metrics.messages_rejected_total.get(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let publisher = RecordingPublisher::new();
        let mut binding = MetadataBinding::Fixed(HashMap::new());
        let config = config();
        let metrics = DataServiceMetrics::new().unwrap();
        let mut handler =
            MessageHandler::new(publisher.clone(), &mut binding, &config, &metrics);

        let (delivery, probe) =
            recorded_delivery("node", Some("u1"), None, b"not a message".to_vec());
        handler.handle_delivery(delivery).await.unwrap();

        assert!(probe.is_rejected());
        assert_eq!(metrics.messages_rejected_total.get(), 1);
    }

    #[tokio::test]
    async fn test_unknown_scope_is_rejected() {
        let publisher = RecordingPublisher::new();
        let mut binding = MetadataBinding::Fixed(HashMap::from([("u1".to_string(), AppMeta::new())]));
        let config = config();
        let metrics = DataServiceMetrics::new().unwrap();
        let mut handler =
            MessageHandler::new(publisher.clone(), &mut binding, &config, &metrics);

        let (delivery, probe) = recorded_delivery("cloud", Some("u1"), None, encoded("test", 1));
        handler.handle_delivery(delivery).await.unwrap();

        assert!(probe.is_rejected());
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_fault_leaves_delivery_unacked() {
        let publisher = RecordingPublisher::new();
        publisher.set_failing(true);
        let mut binding = MetadataBinding::Fixed(HashMap::from([("u1".to_string(), AppMeta::new())]));
        let config = config();
        let metrics = DataServiceMetrics::new().unwrap();
        let mut handler =
            MessageHandler::new(publisher.clone(), &mut binding, &config, &metrics);

        let (delivery, probe) = recorded_delivery("node", Some("u1"), None, encoded("test", 1));
        let result = handler.handle_delivery(delivery).await;

        assert!(result.is_err());
        assert!(probe.is_pending());
        assert_eq!(metrics.messages_rejected_total.get(), 0);
    }

    #[tokio::test]
    async fn test_upload_rewrite_on_direct_path() {
        let publisher = RecordingPublisher::new();
        let app_meta = AppMeta::from([
            ("job".to_string(), "sage".to_string()),
            ("task".to_string(), "testing".to_string()),
            ("plugin".to_string(), "ns/p:1.2.3".to_string()),
        ]);
        let mut binding = MetadataBinding::Fixed(HashMap::from([("u2".to_string(), app_meta)]));
        let config = config();
        let metrics = DataServiceMetrics::new().unwrap();
        let mut handler =
            MessageHandler::new(publisher.clone(), &mut binding, &config, &metrics);

        let mut msg = Message::new("upload", "ignored", 1_600_000_000_000_000_000);
        msg.meta
            .insert("filename".to_string(), "sample.jpg".to_string());
        let (delivery, probe) = recorded_delivery("beehive", Some("u2"), None, encode(&msg));
        handler.handle_delivery(delivery).await.unwrap();

        assert!(probe.is_acked());
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].persistent);

        let sent = decode(&published[0].body).unwrap();
        assert_eq!(sent.name, "upload");
        assert_eq!(
            sent.value,
            Value::Text(
                "https://storage.sagecontinuum.org/api/v1/data/sage/sage-testing-1.2.3/0000000000000001/1600000000000000000-sample.jpg"
                    .to_string()
            )
        );
    }
}
