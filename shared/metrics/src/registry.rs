//! Metric definitions

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// All metrics exported by the data sharing service.
///
/// The core set covers the enrichment pipeline. The remaining counters and
/// gauges track the backlog metadata binding and its pod watch; they stay at
/// zero when the cache binding is active.
pub struct DataServiceMetrics {
    registry: Registry,

    pub messages_total: IntCounter,
    pub messages_rejected_total: IntCounter,
    pub messages_published_node_total: IntCounter,
    pub messages_published_beehive_total: IntCounter,

    pub messages_backlogged_total: IntCounter,
    pub messages_expired_total: IntCounter,
    pub pods_expired_total: IntCounter,
    pub messages_in_backlog: IntGauge,
    pub pods_in_backlog: IntGauge,

    pub pod_events_total: IntCounter,
    pub api_exception_total: IntCounter,
    pub last_exception_time: IntGauge,
}

impl DataServiceMetrics {
    /// Create and register the full metric set.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounter::new(
            "wes_data_service_messages_total",
            "Total number of deliveries entering the handler.",
        )?;
        let messages_rejected_total = IntCounter::new(
            "wes_data_service_messages_rejected_total",
            "Total number of deliveries rejected.",
        )?;
        let messages_published_node_total = IntCounter::new(
            "wes_data_service_messages_published_node_total",
            "Total number of messages published to the node exchange.",
        )?;
        let messages_published_beehive_total = IntCounter::new(
            "wes_data_service_messages_published_beehive_total",
            "Total number of messages published to the beehive exchange.",
        )?;
        let messages_backlogged_total = IntCounter::new(
            "wes_data_service_messages_backlogged_total",
            "Total number of deliveries held pending pod metadata.",
        )?;
        let messages_expired_total = IntCounter::new(
            "wes_data_service_messages_expired_total",
            "Total number of backlogged deliveries rejected by expiry.",
        )?;
        let pods_expired_total = IntCounter::new(
            "wes_data_service_pods_expired_total",
            "Total number of pod states dropped by expiry.",
        )?;
        let messages_in_backlog = IntGauge::new(
            "wes_data_service_messages_in_backlog",
            "Number of deliveries currently backlogged.",
        )?;
        let pods_in_backlog = IntGauge::new(
            "wes_data_service_pods_in_backlog",
            "Number of pods currently tracked by the backlog.",
        )?;
        let pod_events_total = IntCounter::new(
            "wes_data_service_kubernetes_pod_events_total",
            "Total number of pod events received.",
        )?;
        let api_exception_total = IntCounter::new(
            "wes_data_service_kubernetes_api_exception_total",
            "Total number of pod watch API failures.",
        )?;
        let last_exception_time = IntGauge::new(
            "wes_data_service_kubernetes_last_exception_time",
            "Unix time of the most recent pod watch API failure.",
        )?;

        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(messages_rejected_total.clone()))?;
        registry.register(Box::new(messages_published_node_total.clone()))?;
        registry.register(Box::new(messages_published_beehive_total.clone()))?;
        registry.register(Box::new(messages_backlogged_total.clone()))?;
        registry.register(Box::new(messages_expired_total.clone()))?;
        registry.register(Box::new(pods_expired_total.clone()))?;
        registry.register(Box::new(messages_in_backlog.clone()))?;
        registry.register(Box::new(pods_in_backlog.clone()))?;
        registry.register(Box::new(pod_events_total.clone()))?;
        registry.register(Box::new(api_exception_total.clone()))?;
        registry.register(Box::new(last_exception_time.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            messages_rejected_total,
            messages_published_node_total,
            messages_published_beehive_total,
            messages_backlogged_total,
            messages_expired_total,
            pods_expired_total,
            messages_in_backlog,
            pods_in_backlog,
            pod_events_total,
            api_exception_total,
            last_exception_time,
        })
    }

    /// Render the current metric values in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}
