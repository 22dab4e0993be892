//! Configuration management.
//!
//! Defaults, then an optional JSON file, then `VIRTWATCH_*` environment
//! overrides. Binaries apply their command-line flags last.

use crate::error::{Result, VirtwatchError};
use crate::ports;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable naming a JSON config file.
pub const ENV_CONFIG: &str = "VIRTWATCH_CONFIG";
pub const ENV_LISTEN: &str = "VIRTWATCH_LISTEN";
pub const ENV_URI: &str = "VIRTWATCH_URI";
pub const ENV_METRICS_PORT: &str = "VIRTWATCH_METRICS_PORT";

/// Runtime configuration shared by the daemon and the event listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address
    pub listen_addr: SocketAddr,
    /// Hypervisor connection URI
    pub libvirt_uri: String,
    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,
    pub log_level: String,
    /// Upper bound on one event dispatch iteration, in milliseconds
    pub event_tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], ports::PORT_HTTP)),
            libvirt_uri: "qemu:///system".to_string(),
            metrics_port: None,
            log_level: "info".to_string(),
            event_tick_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration: file (explicit path, else `VIRTWATCH_CONFIG`) then env.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VirtwatchError::IoError { path: path.to_path_buf(), source: e })?;
        serde_json::from_str(&content).map_err(|e| VirtwatchError::InvalidConfig {
            reason: format!("Failed to parse {}: {}", path.display(), e),
        })
    }

    /// Apply `VIRTWATCH_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.listen_addr =
                listen.parse::<SocketAddr>().map_err(|e| VirtwatchError::InvalidConfig {
                    reason: format!("{}='{}': {}", ENV_LISTEN, listen, e),
                })?;
        }
        if let Some(uri) = lookup(ENV_URI) {
            self.libvirt_uri = uri;
        }
        if let Some(port) = lookup(ENV_METRICS_PORT) {
            let port = port.parse::<u16>().map_err(|e| VirtwatchError::InvalidConfig {
                reason: format!("{}='{}': {}", ENV_METRICS_PORT, port, e),
            })?;
            self.metrics_port = Some(port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.libvirt_uri.trim().is_empty() {
            return Err(VirtwatchError::InvalidConfig {
                reason: "libvirt_uri must not be empty".to_string(),
            });
        }
        if self.event_tick_ms == 0 {
            return Err(VirtwatchError::InvalidConfig {
                reason: "event_tick_ms must be greater than zero".to_string(),
            });
        }
        if self.metrics_port.is_some_and(|port| port == self.listen_addr.port()) {
            return Err(VirtwatchError::InvalidConfig {
                reason: format!(
                    "metrics port {} collides with the HTTP listener",
                    self.listen_addr.port()
                ),
            });
        }
        Ok(())
    }
}
