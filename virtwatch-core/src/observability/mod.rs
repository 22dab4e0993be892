//! Observability infrastructure: tracing, metrics, health checks.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod health;
pub mod metrics;

/// Initialize logging and, when `metrics_port` is set, the Prometheus exporter.
///
/// `log_level` is the default directive; `RUST_LOG` entries take precedence.
/// Must be called once at startup before any other operations.
pub fn init(
    service: &str,
    log_level: &str,
    metrics_port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    if let Some(port) = metrics_port {
        PrometheusBuilder::new().with_http_listener(([0, 0, 0, 0], port)).install()?;
        tracing::info!(service, port, "Prometheus metrics exporter listening");
    }

    metrics::register_core_metrics();
    tracing::info!(service, version = env!("CARGO_PKG_VERSION"), "Observability initialized");

    Ok(())
}
