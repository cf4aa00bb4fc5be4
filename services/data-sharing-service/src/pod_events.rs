//! Plugin pod events
//!
//! The scheduler surfaces plugin placement through pod events. The watcher
//! below adapts any [`PodEventSource`] into a queue the consumer loop drains
//! on its own cadence, restarting the source with a fixed backoff when the
//! upstream API hiccups. The Kubernetes-backed source filters to plugin pods
//! by label and discards pods not yet assigned to a host.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::{Api, Client};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};
use wes_cache::AppMeta;
use wes_metrics::DataServiceMetrics;

/// Label carrying the scheduled job name.
pub const LABEL_JOB: &str = "sagecontinuum.org/plugin-job";

/// Label identifying plugin pods and carrying the task name.
pub const LABEL_TASK: &str = "sagecontinuum.org/plugin-task";

/// Job recorded when the scheduler did not label one.
const DEFAULT_JOB: &str = "sage";

/// One scheduler assignment of a plugin pod to a host.
#[derive(Debug, Clone)]
pub struct PodEvent {
    pub uid: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub host: String,
}

/// Pod watch error types
#[derive(Debug, Error)]
pub enum PodWatchError {
    /// The watch failed but can be restarted.
    #[error("pod watch API error: {0}")]
    Api(String),

    /// The watch cannot be recovered; the service must stop.
    #[error("pod watch terminal error: {0}")]
    Terminal(String),
}

/// A stream of scheduler assignments.
#[async_trait]
pub trait PodEventSource: Send {
    async fn next_event(&mut self) -> Result<PodEvent, PodWatchError>;
}

/// Application metadata derived from a pod assignment.
pub fn app_meta_for_pod(pod: &PodEvent) -> AppMeta {
    let mut meta = AppMeta::new();
    meta.insert("host".to_string(), pod.host.clone());
    if !pod.image.is_empty() {
        meta.insert("plugin".to_string(), pod.image.clone());
    }
    meta.insert(
        "job".to_string(),
        pod.labels
            .get(LABEL_JOB)
            .cloned()
            .unwrap_or_else(|| DEFAULT_JOB.to_string()),
    );
    meta.insert(
        "task".to_string(),
        pod.labels
            .get(LABEL_TASK)
            .cloned()
            .unwrap_or_else(|| pod.name.clone()),
    );
    meta
}

/// Long-lived watcher task feeding pod events into a drainable queue.
pub struct PodEventWatcher {
    events: mpsc::UnboundedReceiver<PodEvent>,
    terminated: Arc<AtomicBool>,
}

impl PodEventWatcher {
    /// Spawn the watch loop. API errors restart the source after `backoff`;
    /// a terminal error stops the loop and flags the watcher as dead.
    pub fn spawn(
        mut source: impl PodEventSource + 'static,
        backoff: Duration,
        metrics: Arc<DataServiceMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));
        let terminated_flag = Arc::clone(&terminated);

        tokio::spawn(async move {
            loop {
                match source.next_event().await {
                    Ok(event) => {
                        metrics.pod_events_total.inc();
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(PodWatchError::Api(message)) => {
                        metrics.api_exception_total.inc();
                        metrics
                            .last_exception_time
                            .set(chrono::Utc::now().timestamp());
                        warn!(error = %message, "pod watch failed, restarting");
                        tokio::time::sleep(backoff).await;
                    }
                    Err(PodWatchError::Terminal(message)) => {
                        error!(error = %message, "pod watch cannot be recovered");
                        break;
                    }
                }
            }
            terminated_flag.store(true, Ordering::SeqCst);
        });

        Self {
            events: rx,
            terminated,
        }
    }

    /// Take every event received since the last drain.
    pub fn drain(&mut self) -> Vec<PodEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Whether the watch loop has stopped for good.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Pod event source backed by the Kubernetes watch API.
pub struct KubePodEventSource {
    label_selector: String,
    stream: Option<BoxStream<'static, Result<watcher::Event<Pod>, watcher::Error>>>,
    pending: VecDeque<PodEvent>,
}

impl KubePodEventSource {
    pub fn new(label_selector: impl Into<String>) -> Self {
        Self {
            label_selector: label_selector.into(),
            stream: None,
            pending: VecDeque::new(),
        }
    }

    async fn start_watch(
        label_selector: &str,
    ) -> Result<BoxStream<'static, Result<watcher::Event<Pod>, watcher::Error>>, PodWatchError>
    {
        let client = Client::try_default()
            .await
            .map_err(|e| PodWatchError::Terminal(format!("no kubernetes client: {e}")))?;
        let pods: Api<Pod> = Api::all(client);
        let config = watcher::Config::default().labels(label_selector);
        Ok(watcher(pods, config).boxed())
    }

    fn enqueue(&mut self, event: watcher::Event<Pod>) {
        match event {
            watcher::Event::Applied(pod) => {
                self.pending.extend(pod_event_from(pod));
            }
            watcher::Event::Restarted(pods) => {
                for pod in pods {
                    self.pending.extend(pod_event_from(pod));
                }
            }
            watcher::Event::Deleted(_) => {}
        }
    }
}

#[async_trait]
impl PodEventSource for KubePodEventSource {
    async fn next_event(&mut self) -> Result<PodEvent, PodWatchError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            match self.stream.as_mut() {
                None => {
                    let stream = Self::start_watch(&self.label_selector).await?;
                    self.stream = Some(stream);
                }
                Some(stream) => match stream.next().await {
                    Some(Ok(event)) => self.enqueue(event),
                    Some(Err(e)) => {
                        self.stream = None;
                        return Err(PodWatchError::Api(e.to_string()));
                    }
                    None => {
                        self.stream = None;
                        return Err(PodWatchError::Api("watch stream ended".to_string()));
                    }
                },
            }
        }
    }
}

/// Convert a pod object into an event, discarding pods without an assigned
/// host.
fn pod_event_from(pod: Pod) -> Option<PodEvent> {
    let uid = pod.metadata.uid?;
    let spec = pod.spec?;
    let host = spec.node_name?;
    let image = spec
        .containers
        .first()
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    Some(PodEvent {
        uid,
        name: pod.metadata.name.unwrap_or_default(),
        labels: pod.metadata.labels.unwrap_or_default(),
        image,
        host,
    })
}
