//! Metrics exporter configuration

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Prometheus exposition endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MetricsConfig {
    /// Bind host for the exporter
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port for the exporter
    pub port: u16,
}

impl MetricsConfig {
    /// Get the exporter bind address, if the host parses as an IP.
    pub fn bind_address(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        let config = MetricsConfig::default();
        let addr = config.bind_address().unwrap();
        assert_eq!(addr.port(), 8080);

        let config = MetricsConfig {
            host: "metrics.invalid".to_string(),
            port: 8080,
        };
        assert!(config.bind_address().is_none());
    }
}
