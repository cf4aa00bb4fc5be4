//! WES Data Sharing Service
//!
//! Consumes validated plugin messages from the local broker, enriches them
//! with application and node metadata, and fans them out to the node-local
//! topic exchange and the cloud-bound Beehive exchange.
//!
//! Application metadata is bound by one of two strategies: a point-read
//! against the app-metadata cache (the default), or a per-pod backlog
//! reconciled against the Kubernetes pod event stream (kept for older
//! deployments).

pub mod amqp;
pub mod backlog;
pub mod delivery;
pub mod enrich;
pub mod handler;
pub mod pod_events;
pub mod supervisor;
pub mod testing;

pub use handler::{MessageHandler, MetadataBinding, PipelineConfig};
