//! WES Data Sharing Service
//!
//! Entry point: parse the command line (every flag falls back to the
//! matching environment variable), validate settings, wire the metadata
//! binding and metrics exporter, and hand control to the supervisor.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wes_cache::AppMetaCache;
use wes_config::{
    AmqpConfig, AppMetaCacheConfig, MetadataBindingMode, MetricsConfig, PodStateConfig, Settings,
    SystemMeta,
};
use wes_data_sharing_service::backlog::BacklogEngine;
use wes_data_sharing_service::handler::MetadataBinding;
use wes_data_sharing_service::pod_events::{KubePodEventSource, PodEventWatcher};
use wes_data_sharing_service::supervisor::Supervisor;
use wes_metrics::DataServiceMetrics;

#[derive(Parser, Debug)]
#[command(name = "wes-data-sharing-service", about, version)]
struct Args {
    /// Enable verbose logging
    #[arg(long, env = "DEBUG")]
    debug: bool,

    /// Message name that triggers the upload URL rewrite
    #[arg(long, env = "UPLOAD_PUBLISH_NAME", default_value = "upload")]
    upload_publish_name: String,

    #[arg(long, env = "RABBITMQ_HOST", default_value = "rabbitmq-server")]
    rabbitmq_host: String,

    #[arg(long, env = "RABBITMQ_PORT", default_value_t = 5672)]
    rabbitmq_port: u16,

    #[arg(long, env = "RABBITMQ_USERNAME", default_value = "service")]
    rabbitmq_username: String,

    #[arg(long, env = "RABBITMQ_PASSWORD", default_value = "service")]
    rabbitmq_password: String,

    #[arg(long, env = "APP_META_CACHE_HOST", default_value = "wes-app-meta-cache")]
    app_meta_cache_host: String,

    #[arg(long, env = "APP_META_CACHE_PORT", default_value_t = 6379)]
    app_meta_cache_port: u16,

    /// Node identifier stamped into every outgoing message
    #[arg(long, env = "WAGGLE_NODE_ID", default_value = "0000000000000000")]
    waggle_node_id: String,

    /// Node VSN stamped into every outgoing message
    #[arg(long, env = "WAGGLE_NODE_VSN", default_value = "W000")]
    waggle_node_vsn: String,

    #[arg(long, env = "METRICS_HOST", default_value = "0.0.0.0")]
    metrics_host: String,

    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,

    #[arg(long, env = "SRC_QUEUE", default_value = "to-validator")]
    src_queue: String,

    #[arg(long, env = "DST_EXCHANGE_BEEHIVE", default_value = "to-beehive")]
    dst_exchange_beehive: String,

    #[arg(long, env = "DST_EXCHANGE_NODE", default_value = "data.topic")]
    dst_exchange_node: String,

    /// Whitespace-separated broker usernames trusted as system producers
    #[arg(long, env = "SYSTEM_USERS", default_value = "")]
    system_users: String,

    /// Metadata binding strategy: cache or backlog
    #[arg(long, env = "METADATA_BINDING", default_value = "cache")]
    metadata_binding: String,

    /// Seconds a pod with bound metadata is remembered (backlog binding)
    #[arg(long, env = "POD_EXPIRE_DURATION", default_value_t = 7200)]
    pod_expire_duration: u64,

    /// Seconds a pod may wait for metadata (backlog binding)
    #[arg(long, env = "POD_WITHOUT_METADATA_EXPIRE_DURATION", default_value_t = 300)]
    pod_without_metadata_expire_duration: u64,

    /// Label selector identifying plugin pods (backlog binding)
    #[arg(
        long,
        env = "POD_LABEL_SELECTOR",
        default_value = "sagecontinuum.org/plugin-task"
    )]
    pod_label_selector: String,
}

impl Args {
    fn to_settings(&self) -> anyhow::Result<Settings> {
        let binding = MetadataBindingMode::parse(&self.metadata_binding).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid --metadata-binding {:?} (expected cache or backlog)",
                self.metadata_binding
            )
        })?;

        Ok(Settings {
            amqp: AmqpConfig {
                host: self.rabbitmq_host.clone(),
                port: self.rabbitmq_port,
                username: self.rabbitmq_username.clone(),
                password: self.rabbitmq_password.clone(),
                src_queue: self.src_queue.clone(),
                dst_exchange_beehive: self.dst_exchange_beehive.clone(),
                dst_exchange_node: self.dst_exchange_node.clone(),
                ..AmqpConfig::default()
            },
            app_meta_cache: AppMetaCacheConfig {
                host: self.app_meta_cache_host.clone(),
                port: self.app_meta_cache_port,
                ..AppMetaCacheConfig::default()
            },
            metrics: MetricsConfig {
                host: self.metrics_host.clone(),
                port: self.metrics_port,
            },
            system: SystemMeta {
                node: self.waggle_node_id.clone(),
                vsn: self.waggle_node_vsn.clone(),
            },
            pod_state: PodStateConfig {
                pod_state_ttl: self.pod_expire_duration,
                pod_without_metadata_ttl: self.pod_without_metadata_expire_duration,
                label_selector: self.pod_label_selector.clone(),
                ..PodStateConfig::default()
            },
            upload_publish_name: self.upload_publish_name.clone(),
            system_users: self
                .system_users
                .split_whitespace()
                .map(String::from)
                .collect(),
            binding,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    let settings = args.to_settings()?;
    settings.validate_config()?;

    info!(
        node = %settings.system.node,
        vsn = %settings.system.vsn,
        broker = %settings.amqp.masked_url(),
        "starting data sharing service"
    );

    let metrics = Arc::new(DataServiceMetrics::new()?);

    {
        let config = settings.metrics.clone();
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = wes_metrics::serve(config, metrics).await {
                error!(error = %e, "metrics exporter failed");
            }
        });
    }

    let (binding, pod_watcher) = match settings.binding {
        MetadataBindingMode::Cache => {
            let cache = AppMetaCache::connect(settings.app_meta_cache.clone())?;
            (MetadataBinding::Cache(cache), None)
        }
        MetadataBindingMode::Backlog => {
            let source = KubePodEventSource::new(settings.pod_state.label_selector.clone());
            let watcher = PodEventWatcher::spawn(
                source,
                settings.pod_state.watcher_backoff_duration(),
                Arc::clone(&metrics),
            );
            let engine = BacklogEngine::new(&settings.pod_state);
            (MetadataBinding::Backlog(engine), Some(watcher))
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let supervisor = Supervisor::new(settings, metrics, binding, pod_watcher, shutdown);
    supervisor.run().await?;

    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGINT handler");
            return std::future::pending::<()>().await;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            return std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
