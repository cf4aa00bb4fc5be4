//! Pod state configuration for the backlog metadata binding

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Lifetimes and cadences for per-pod state kept by the backlog binding.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PodStateConfig {
    /// Seconds a pod with bound metadata is remembered after its last touch
    #[validate(range(min = 1))]
    pub pod_state_ttl: u64,

    /// Seconds a pod may wait for metadata before its backlog is rejected
    #[validate(range(min = 1))]
    pub pod_without_metadata_ttl: u64,

    /// Seconds between expiry sweeps
    #[validate(range(min = 1))]
    pub expiry_sweep_interval: u64,

    /// Seconds between drains of the pod event queue
    #[validate(range(min = 1))]
    pub pod_event_drain_interval: u64,

    /// Seconds to back off before restarting a failed pod watch
    #[validate(range(min = 1))]
    pub watcher_backoff: u64,

    /// Label selector identifying plugin pods
    #[validate(length(min = 1))]
    pub label_selector: String,
}

impl PodStateConfig {
    pub fn pod_state_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.pod_state_ttl)
    }

    pub fn pod_without_metadata_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.pod_without_metadata_ttl)
    }

    pub fn expiry_sweep_interval_duration(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval)
    }

    pub fn pod_event_drain_interval_duration(&self) -> Duration {
        Duration::from_secs(self.pod_event_drain_interval)
    }

    pub fn watcher_backoff_duration(&self) -> Duration {
        Duration::from_secs(self.watcher_backoff)
    }
}

impl Default for PodStateConfig {
    fn default() -> Self {
        Self {
            pod_state_ttl: 7200,
            pod_without_metadata_ttl: 300,
            expiry_sweep_interval: 10,
            pod_event_drain_interval: 1,
            watcher_backoff: 5,
            label_selector: "sagecontinuum.org/plugin-task".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl_ordering() {
        let config = PodStateConfig::default();
        assert!(config.pod_without_metadata_ttl <= config.pod_state_ttl);
    }
}
