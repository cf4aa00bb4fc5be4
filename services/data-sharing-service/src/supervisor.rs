//! Connect-consume-drain loop
//!
//! Owns the broker connection lifecycle: declare topology, consume the
//! source queue, run the periodic timers, and rebuild everything after a
//! transport fault. Pod state survives reconnects; parked deliveries do not,
//! since their acknowledgement handles die with the channel.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use lapin::options::{BasicCancelOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wes_config::Settings;
use wes_errors::{DataServiceError, Result};
use wes_metrics::DataServiceMetrics;

use crate::amqp::{self, ChannelPublisher};
use crate::delivery::InboundMessage;
use crate::handler::{MessageHandler, MetadataBinding, PipelineConfig};
use crate::pod_events::PodEventWatcher;

/// Consumer tag the service registers with the broker.
const CONSUMER_TAG: &str = "wes-data-sharing-service";

pub struct Supervisor {
    settings: Settings,
    config: PipelineConfig,
    metrics: Arc<DataServiceMetrics>,
    binding: MetadataBinding,
    pod_watcher: Option<PodEventWatcher>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        settings: Settings,
        metrics: Arc<DataServiceMetrics>,
        binding: MetadataBinding,
        pod_watcher: Option<PodEventWatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        let config = PipelineConfig::from_settings(&settings);
        Self {
            settings,
            config,
            metrics,
            binding,
            pod_watcher,
            shutdown,
        }
    }

    /// Run until shutdown or an unrecoverable fault.
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.run_connection().await {
                Ok(()) => {
                    info!("shutdown complete");
                    return Ok(());
                }
                Err(err @ DataServiceError::WatcherTerminal { .. }) => return Err(err),
                Err(err) => {
                    warn!(error = %err, "broker connection lost, reconnecting");
                    let dropped = self.binding.clear_backlogs();
                    if dropped > 0 {
                        self.metrics.messages_in_backlog.set(0);
                        info!(dropped, "dropped parked deliveries; the broker will redeliver");
                    }
                    tokio::time::sleep(self.settings.amqp.reconnect_interval_duration()).await;
                }
            }
        }
    }

    async fn run_connection(&mut self) -> Result<()> {
        let connection = amqp::connect(&self.settings.amqp).await?;
        let channel = connection.create_channel().await?;
        amqp::declare_topology(&channel, &self.settings.amqp).await?;

        let mut consumer = channel
            .basic_consume(
                &self.settings.amqp.src_queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let publisher = ChannelPublisher::new(channel.clone());
        let mut handler = MessageHandler::new(
            publisher,
            &mut self.binding,
            &self.config,
            self.metrics.as_ref(),
        );

        let mut sweep =
            tokio::time::interval(self.settings.pod_state.expiry_sweep_interval_duration());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drain =
            tokio::time::interval(self.settings.pod_state.pod_event_drain_interval_duration());
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(queue = %self.settings.amqp.src_queue, "consuming");

        loop {
            tokio::select! {
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => {
                        handler
                            .handle_delivery(InboundMessage::from_delivery(delivery))
                            .await?;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(DataServiceError::transport("consumer stream closed")),
                },
                _ = sweep.tick() => handler.sweep_expired(Instant::now()).await?,
                _ = drain.tick() => {
                    if let Some(watcher) = self.pod_watcher.as_mut() {
                        for event in watcher.drain() {
                            handler.handle_pod_event(&event).await?;
                        }
                        if watcher.is_terminated() {
                            return Err(DataServiceError::WatcherTerminal {
                                message: "pod event watcher stopped".to_string(),
                            });
                        }
                    }
                },
                _ = self.shutdown.cancelled() => {
                    info!("signal received, draining");
                    let tag = consumer.tag();
                    let _ = channel
                        .basic_cancel(tag.as_str(), BasicCancelOptions::default())
                        .await;
                    let _ = channel.close(200, "shutdown").await;
                    let _ = connection.close(200, "shutdown").await;
                    return Ok(());
                }
            }
        }
    }
}
