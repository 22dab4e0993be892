//! VM domain types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time snapshot of one running domain.
///
/// Built fresh on every aggregation pass and never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmState {
    /// Domain name (unique within a connection at a point in time)
    pub id: String,

    /// Number of vCPUs
    pub cpu: u32,

    /// Current memory in bytes
    pub memory: u64,

    /// Number of disk volumes reported for the domain
    pub disk_count: usize,

    /// Sum of the capacities that could be queried, in bytes
    pub disk_size: u64,

    /// Stable identity across renames
    pub uuid: String,

    /// First lease-reported IPv4 address, empty when none is known
    pub ip_address: String,

    /// Domain status
    pub status: VmStatus,
}

/// VM status.
///
/// Only active domains are enumerated, so snapshots are always `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    #[default]
    Running,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
        }
    }
}

/// Reference to one domain as returned by the active-domain listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainHandle {
    name: String,
}

impl DomainHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Domain name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// CPU and memory figures for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainInfo {
    pub vcpus: u32,
    pub memory_bytes: u64,
}

/// A disk attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskVolume {
    /// Guest target device (e.g. "vda")
    pub target: String,

    /// Backing locator: a host path, a network image name, or a volume name
    /// inside `pool`
    pub source: String,

    /// Storage pool holding `source`, for pool-backed disks
    pub pool: Option<String>,
}

impl DiskVolume {
    pub fn new(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self { target: target.into(), source: source.into(), pool: None }
    }

    pub fn in_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }
}

/// Address family of an interface address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Ipv4,
    Ipv6,
}

/// One address reported for a network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub kind: AddressKind,
    pub addr: String,
    pub prefix: u32,
}

/// Network interface as reported by lease-based discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub hwaddr: String,
    pub addrs: Vec<InterfaceAddress>,
}

/// Per-domain query a snapshot is assembled from.
///
/// Used to label query errors, log lines and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainField {
    Info,
    Disks,
    VolumeCapacity,
    Uuid,
    Ipv4,
}

impl DomainField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Disks => "disks",
            Self::VolumeCapacity => "volume_capacity",
            Self::Uuid => "uuid",
            Self::Ipv4 => "ipv4",
        }
    }
}

impl fmt::Display for DomainField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
