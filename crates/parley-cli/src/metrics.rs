//! Prometheus export for the engine's metrics.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus recorder and serve it on `127.0.0.1:{port}`.
///
/// # Errors
///
/// Returns an error if the recorder or its listener cannot be installed.
pub fn install(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics exporter on {addr}"))?;
    parley_core::metrics::describe();

    info!(%addr, "Metrics exporter listening");
    Ok(())
}
