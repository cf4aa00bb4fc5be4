//! HTTP exporter for Prometheus scraping

use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;
use wes_config::MetricsConfig;

use crate::DataServiceMetrics;

/// Serve the metric set over HTTP until the process exits.
///
/// Both `/` and `/metrics` answer with the text exposition, matching what
/// fleet scrape configs already expect.
pub async fn serve(config: MetricsConfig, metrics: Arc<DataServiceMetrics>) -> std::io::Result<()> {
    let app = Router::new()
        .route("/", get(render))
        .route("/metrics", get(render))
        .with_state(metrics);

    let bind = (config.host.as_str(), config.port);
    let listener = TcpListener::bind(bind).await?;
    info!(host = %config.host, port = config.port, "metrics exporter listening");

    axum::serve(listener, app).await
}

async fn render(State(metrics): State<Arc<DataServiceMetrics>>) -> String {
    metrics.render()
}
