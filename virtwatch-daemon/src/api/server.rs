//! HTTP server: router, shared state and graceful shutdown.

use super::{health, stream, vms};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use virtwatch_core::observability::health::{HealthStatus, HYPERVISOR};
use virtwatch_core::{
    HealthChecker, HypervisorClient, Result, SnapshotAggregator, VirtwatchError, VmState,
};

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    aggregator: SnapshotAggregator,
    health: HealthChecker,
}

impl AppState {
    pub async fn new(client: Arc<dyn HypervisorClient>) -> Self {
        let health = HealthChecker::new();
        health.register_subsystem(HYPERVISOR).await;
        Self { aggregator: SnapshotAggregator::new(client), health }
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Run one snapshot pass off the async runtime.
    ///
    /// Hypervisor queries block, so the pass runs on the blocking pool. The
    /// outcome also drives the hypervisor subsystem health.
    pub async fn snapshot(&self) -> Result<Vec<VmState>> {
        let aggregator = self.aggregator.clone();
        let result = tokio::task::spawn_blocking(move || aggregator.collect())
            .await
            .unwrap_or_else(|e| Err(VirtwatchError::internal(e)));

        match &result {
            Ok(_) => self.health.update_subsystem(HYPERVISOR, HealthStatus::Healthy, None).await,
            Err(e) => {
                self.health
                    .update_subsystem(HYPERVISOR, HealthStatus::Unhealthy, Some(e.to_string()))
                    .await
            }
        }
        result
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/vms", get(vms::list_vms))
        .route("/ws", get(stream::stream_vms))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}
