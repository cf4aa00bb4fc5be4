//! WES Configuration Library
//!
//! Typed settings for the data sharing service. The binary builds these
//! structs from its command line (every flag falls back to the matching
//! environment variable) and calls [`Settings::validate`] before wiring
//! anything up; validation failures are unrecoverable configuration errors.

pub mod amqp;
pub mod cache;
pub mod metrics;
pub mod pods;
pub mod settings;

pub use amqp::AmqpConfig;
pub use cache::AppMetaCacheConfig;
pub use metrics::MetricsConfig;
pub use pods::PodStateConfig;
pub use settings::{MetadataBindingMode, Settings, SystemMeta};
