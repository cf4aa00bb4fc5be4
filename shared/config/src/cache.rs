//! Application metadata cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Settings for the app-metadata key-value store and its in-process front.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppMetaCacheConfig {
    /// Cache host
    #[validate(length(min = 1))]
    pub host: String,

    /// Cache port
    pub port: u16,

    /// Milliseconds to wait on a lookup before treating it as a miss
    #[validate(range(min = 1, max = 1000))]
    pub lookup_timeout_ms: u64,

    /// Number of entries held by the in-process memoization layer
    #[validate(range(min = 1))]
    pub memo_capacity: u64,
}

impl AppMetaCacheConfig {
    /// Get the redis connection URL.
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    /// Get the lookup timeout as a Duration.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for AppMetaCacheConfig {
    fn default() -> Self {
        Self {
            host: "wes-app-meta-cache".to_string(),
            port: 6379,
            lookup_timeout_ms: 1000,
            memo_capacity: 128,
        }
    }
}
