//! Client factory for hypervisor backend selection.
//!
//! Backends are compiled in via cargo features. The factory picks the backend
//! from the connection URI scheme and gives a helpful error when the matching
//! backend was not built.

use crate::client::HypervisorClient;
use crate::error::{Result, VirtwatchError};
use std::sync::Arc;
use tracing::{info, instrument};

/// URI schemes served by the libvirt backend.
const LIBVIRT_SCHEMES: &[&str] = &["qemu", "qemu+ssh", "qemu+tcp", "qemu+tls", "qemu+unix", "test"];

/// Configuration for client construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hypervisor connection URI (e.g. `qemu:///system`)
    pub uri: String,

    /// Register the default event loop implementation before connecting.
    /// Required for subscriptions; query-only clients leave it off.
    pub events: bool,

    /// Upper bound in milliseconds on how long one dispatch iteration blocks.
    pub event_tick_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { uri: "qemu:///system".to_string(), events: false, event_tick_ms: 1000 }
    }
}

/// Factory for creating hypervisor clients.
pub struct ClientFactory;

impl ClientFactory {
    /// Connect a client for `config.uri`.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the URI has no recognizable scheme
    /// - `Unsupported` if the backend for the scheme was not compiled in
    /// - `Connection` if the backend cannot reach the hypervisor
    #[instrument(skip(config), fields(uri = %config.uri))]
    pub fn connect(config: &ClientConfig) -> Result<Arc<dyn HypervisorClient>> {
        let scheme = scheme(&config.uri)?;

        if LIBVIRT_SCHEMES.contains(&scheme) {
            info!(scheme, "Selecting libvirt backend");
            return Self::connect_libvirt(config);
        }

        Err(VirtwatchError::InvalidConfig {
            reason: format!(
                "Unknown hypervisor URI scheme '{}'. Valid options: {}",
                scheme,
                LIBVIRT_SCHEMES.join(", ")
            ),
        })
    }

    #[cfg(feature = "libvirt")]
    fn connect_libvirt(config: &ClientConfig) -> Result<Arc<dyn HypervisorClient>> {
        let client = crate::client::LibvirtClient::open(config)?;
        Ok(Arc::new(client))
    }

    #[cfg(not(feature = "libvirt"))]
    fn connect_libvirt(_config: &ClientConfig) -> Result<Arc<dyn HypervisorClient>> {
        Err(VirtwatchError::Unsupported {
            backend: "libvirt".to_string(),
            reason: "built without the `libvirt` feature; rebuild with `--features libvirt`"
                .to_string(),
        })
    }
}

fn scheme(uri: &str) -> Result<&str> {
    match uri.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => Ok(scheme),
        _ => Err(VirtwatchError::InvalidConfig {
            reason: format!("Hypervisor URI '{}' has no scheme", uri),
        }),
    }
}
