//! Per-pod delivery backlog for the pod-event metadata binding
//!
//! Deliveries from a pod whose metadata is not yet known are parked here
//! until a pod event binds the metadata, at which point the whole backlog is
//! flushed in arrival order. Pods that never bind are expired and their
//! backlogs rejected; bound pods are forgotten once idle past their TTL.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use wes_cache::AppMeta;
use wes_config::PodStateConfig;
use wes_message::Message;

use crate::delivery::InboundMessage;

/// State tracked for one pod UID.
struct PodState {
    metadata: Option<AppMeta>,
    backlog: VecDeque<(InboundMessage, Message)>,
    updated_at: Instant,
}

/// Deliveries evicted by an expiry sweep.
pub struct SweepOutcome {
    /// Backlogged deliveries whose pod expired without metadata.
    pub expired: Vec<(String, InboundMessage, Message)>,
    /// Number of pod states removed.
    pub pods_expired: usize,
}

/// Pending-delivery store keyed by pod UID.
///
/// Every method takes the current instant so the expiry rules stay
/// deterministic under test.
pub struct BacklogEngine {
    pods: HashMap<String, PodState>,
    without_metadata_ttl: Duration,
    state_ttl: Duration,
}

impl BacklogEngine {
    pub fn new(config: &PodStateConfig) -> Self {
        Self {
            pods: HashMap::new(),
            without_metadata_ttl: config.pod_without_metadata_ttl_duration(),
            state_ttl: config.pod_state_ttl_duration(),
        }
    }

    /// Metadata for a pod, if a pod event already bound it. Touches the pod.
    pub fn lookup(&mut self, uid: &str, now: Instant) -> Option<AppMeta> {
        let state = self.pods.get_mut(uid)?;
        state.updated_at = now;
        state.metadata.clone()
    }

    /// Park a delivery until metadata for its pod arrives.
    pub fn push(&mut self, uid: &str, delivery: InboundMessage, msg: Message, now: Instant) {
        let state = self.pods.entry(uid.to_string()).or_insert_with(|| PodState {
            metadata: None,
            backlog: VecDeque::new(),
            updated_at: now,
        });
        state.backlog.push_back((delivery, msg));
        state.updated_at = now;
    }

    /// Bind metadata for a pod and drain its backlog in arrival order.
    pub fn bind(&mut self, uid: &str, meta: AppMeta, now: Instant) -> Vec<(InboundMessage, Message)> {
        let state = self.pods.entry(uid.to_string()).or_insert_with(|| PodState {
            metadata: None,
            backlog: VecDeque::new(),
            updated_at: now,
        });
        state.metadata = Some(meta);
        state.updated_at = now;
        state.backlog.drain(..).collect()
    }

    /// Remove pods idle past their TTL.
    ///
    /// A pod still waiting for metadata expires on the shorter TTL and hands
    /// its backlog back for rejection; a bound pod just drops off.
    pub fn sweep(&mut self, now: Instant) -> SweepOutcome {
        let mut outcome = SweepOutcome {
            expired: Vec::new(),
            pods_expired: 0,
        };

        let expired_uids: Vec<String> = self
            .pods
            .iter()
            .filter(|(_, state)| {
                let age = now.saturating_duration_since(state.updated_at);
                match state.metadata {
                    Some(_) => age > self.state_ttl,
                    None => age > self.without_metadata_ttl,
                }
            })
            .map(|(uid, _)| uid.clone())
            .collect();

        for uid in expired_uids {
            if let Some(mut state) = self.pods.remove(&uid) {
                outcome.pods_expired += 1;
                while let Some((delivery, msg)) = state.backlog.pop_front() {
                    outcome.expired.push((uid.clone(), delivery, msg));
                }
            }
        }

        outcome
    }

    /// Drop all parked deliveries without touching pod metadata.
    ///
    /// Called after a broker fault: the parked acknowledgement handles point
    /// at a dead channel and the broker will redeliver everything unacked.
    pub fn clear_backlogs(&mut self) -> usize {
        let mut dropped = 0;
        for state in self.pods.values_mut() {
            dropped += state.backlog.len();
            state.backlog.clear();
        }
        dropped
    }

    /// Number of deliveries currently parked.
    pub fn message_count(&self) -> usize {
        self.pods.values().map(|s| s.backlog.len()).sum()
    }

    /// Number of pods currently tracked.
    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }
}
