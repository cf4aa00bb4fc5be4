//! Main service settings

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::Validate;
use wes_errors::DataServiceError;

use crate::{AmqpConfig, AppMetaCacheConfig, MetricsConfig, PodStateConfig};

/// Node-constant metadata stamped onto every outgoing message.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SystemMeta {
    /// Waggle node identifier
    #[validate(length(min = 1))]
    pub node: String,

    /// Node VSN label
    #[validate(length(min = 1))]
    pub vsn: String,
}

impl Default for SystemMeta {
    fn default() -> Self {
        Self {
            node: "0000000000000000".to_string(),
            vsn: "W000".to_string(),
        }
    }
}

/// How application metadata is bound to deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBindingMode {
    /// Point-read against the app-metadata cache (the default).
    Cache,
    /// Per-pod backlog reconciled against the pod event stream.
    Backlog,
}

impl MetadataBindingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cache" => Some(MetadataBindingMode::Cache),
            "backlog" => Some(MetadataBindingMode::Backlog),
            _ => None,
        }
    }
}

/// Complete service settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub amqp: AmqpConfig,

    #[validate(nested)]
    pub app_meta_cache: AppMetaCacheConfig,

    #[validate(nested)]
    pub metrics: MetricsConfig,

    #[validate(nested)]
    pub system: SystemMeta,

    #[validate(nested)]
    pub pod_state: PodStateConfig,

    /// Message name that triggers the upload URL rewrite
    #[validate(length(min = 1))]
    pub upload_publish_name: String,

    /// Broker usernames whose messages skip the application metadata lookup
    pub system_users: HashSet<String>,

    /// Selected metadata binding strategy
    pub binding: MetadataBindingMode,
}

impl Settings {
    /// Validate field constraints and cross-field invariants.
    pub fn validate_config(&self) -> Result<(), DataServiceError> {
        Validate::validate(self).map_err(|e| DataServiceError::Configuration {
            message: format!("invalid settings: {e}"),
        })?;

        if self.pod_state.pod_without_metadata_ttl > self.pod_state.pod_state_ttl {
            return Err(DataServiceError::Configuration {
                message: format!(
                    "pod-without-metadata TTL ({}s) exceeds pod state TTL ({}s)",
                    self.pod_state.pod_without_metadata_ttl, self.pod_state.pod_state_ttl
                ),
            });
        }

        Ok(())
    }

    /// Whether the given broker username is a trusted system producer.
    pub fn is_system_user(&self, user: &str) -> bool {
        self.system_users.contains(user)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            amqp: AmqpConfig::default(),
            app_meta_cache: AppMetaCacheConfig::default(),
            metrics: MetricsConfig::default(),
            system: SystemMeta::default(),
            pod_state: PodStateConfig::default(),
            upload_publish_name: "upload".to_string(),
            system_users: HashSet::new(),
            binding: MetadataBindingMode::Cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate_config().is_ok());
        assert_eq!(settings.upload_publish_name, "upload");
        assert_eq!(settings.binding, MetadataBindingMode::Cache);
    }

    #[test]
    fn test_ttl_invariant() {
        let mut settings = Settings::default();
        settings.pod_state.pod_without_metadata_ttl = settings.pod_state.pod_state_ttl + 1;
        assert!(settings.validate_config().is_err());
    }

    #[test]
    fn test_empty_system_meta_rejected() {
        let mut settings = Settings::default();
        settings.system.vsn = String::new();
        assert!(settings.validate_config().is_err());
    }

    #[test]
    fn test_system_users() {
        let mut settings = Settings::default();
        settings.system_users.insert("service".to_string());
        assert!(settings.is_system_user("service"));
        assert!(!settings.is_system_user("plugin"));
    }

    #[test]
    fn test_binding_mode_parse() {
        assert_eq!(
            MetadataBindingMode::parse("cache"),
            Some(MetadataBindingMode::Cache)
        );
        assert_eq!(
            MetadataBindingMode::parse("backlog"),
            Some(MetadataBindingMode::Backlog)
        );
        assert_eq!(MetadataBindingMode::parse("redis"), None);
    }
}
