//! virtwatchd: serves VM snapshots over HTTP and WebSocket.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;
use virtwatch_core::shutdown::shutdown_signal;
use virtwatch_core::{init_observability, ClientConfig, ClientFactory, Config};
use virtwatch_daemon::api::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "virtwatchd", version, about = "Hypervisor VM snapshot API")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Hypervisor connection URI
    #[arg(short, long)]
    uri: Option<String>,

    /// Prometheus exporter port
    #[arg(long)]
    metrics_port: Option<u16>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(uri) = &self.uri {
            config.libvirt_uri = uri.clone();
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = Some(port);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_observability("virtwatchd", &config.log_level, config.metrics_port)
        .map_err(|e| anyhow!("Failed to initialize observability: {}", e))?;

    let client_config = ClientConfig {
        uri: config.libvirt_uri.clone(),
        events: false,
        event_tick_ms: config.event_tick_ms,
    };
    let client = tokio::task::spawn_blocking(move || ClientFactory::connect(&client_config))
        .await?
        .with_context(|| format!("Failed to connect to {}", config.libvirt_uri))?;
    info!(backend = client.name(), uri = %config.libvirt_uri, "Hypervisor connected");

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let state = AppState::new(client.clone()).await;
    let mut shutdown = shutdown_signal();
    serve(listener, state, async move {
        let _ = shutdown.recv().await;
    })
    .await?;

    info!("virtwatchd shutting down");
    tokio::task::spawn_blocking(move || client.close()).await?;
    Ok(())
}
