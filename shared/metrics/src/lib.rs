//! WES Metrics Library
//!
//! Counters and gauges tracking the data sharing pipeline, plus the HTTP
//! exporter that serves them in Prometheus text exposition format. Metric
//! names are part of the operational contract; dashboards and alerts key on
//! them.

pub mod exporter;
pub mod registry;

pub use exporter::serve;
pub use registry::DataServiceMetrics;
