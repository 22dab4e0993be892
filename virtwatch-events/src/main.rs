//! virtwatch-events: subscribes to lifecycle and block-job events of every
//! active domain and logs them until stopped.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use virtwatch_core::shutdown::shutdown_signal;
use virtwatch_core::{
    init_observability, ClientConfig, ClientFactory, Config, EventSubscriptionManager, StopSignal,
};

#[derive(Parser, Debug)]
#[command(name = "virtwatch-events", version, about = "Hypervisor event listener")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hypervisor connection URI
    #[arg(short, long)]
    uri: Option<String>,

    /// Longest time one dispatch iteration may block, in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(uri) = args.uri {
        config.libvirt_uri = uri;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.event_tick_ms = tick_ms;
    }
    config.validate()?;

    init_observability("virtwatch-events", &config.log_level, config.metrics_port)
        .map_err(|e| anyhow!("Failed to initialize observability: {}", e))?;

    let client_config = ClientConfig {
        uri: config.libvirt_uri.clone(),
        events: true,
        event_tick_ms: config.event_tick_ms,
    };

    let stop = StopSignal::new();
    let loop_stop = stop.clone();
    let mut event_loop = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut manager = EventSubscriptionManager::new();
        manager
            .connect(|| ClientFactory::connect(&client_config))
            .with_context(|| format!("Failed to connect to {}", client_config.uri))?;
        manager.register_all().context("Failed to register event subscriptions")?;
        manager.run(&loop_stop).context("Event loop failed")?;
        Ok(())
    });

    let mut shutdown = shutdown_signal();
    let outcome = tokio::select! {
        outcome = &mut event_loop => outcome,
        _ = shutdown.recv() => {
            info!("Stopping event loop");
            stop.stop();
            event_loop.await
        }
    };

    match outcome? {
        Ok(()) => {
            info!("virtwatch-events stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "virtwatch-events exiting");
            Err(e)
        }
    }
}
