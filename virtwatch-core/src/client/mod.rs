//! Hypervisor client abstraction.
//!
//! Every hypervisor integration implements `HypervisorClient`. It is the only
//! code that talks to the hypervisor connection; the snapshot aggregator and
//! the event subscription manager consume it through `Arc<dyn HypervisorClient>`.
//!
//! Methods are blocking. Async callers run them on the blocking pool.

use crate::error::Result;
use crate::types::{
    AddressKind, DiskVolume, DomainHandle, DomainInfo, EventCallback, EventKind,
    NetworkInterface, SubscriptionHandle,
};

pub mod domain_xml;

#[cfg(feature = "libvirt")]
pub mod libvirt;

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtClient;

mod factory;
pub use factory::{ClientConfig, ClientFactory};

/// Hypervisor client trait.
pub trait HypervisorClient: Send + Sync {
    /// List currently active (running) domains, in hypervisor order.
    ///
    /// Fails with `Connection` when the hypervisor cannot be asked at all.
    fn list_active_domains(&self) -> Result<Vec<DomainHandle>>;

    /// vCPU count and current memory of a domain.
    fn domain_info(&self, domain: &DomainHandle) -> Result<DomainInfo>;

    /// Disk volumes attached to a domain.
    fn domain_disks(&self, domain: &DomainHandle) -> Result<Vec<DiskVolume>>;

    /// Capacity in bytes of one disk volume.
    fn volume_capacity(&self, domain: &DomainHandle, volume: &DiskVolume) -> Result<u64>;

    /// UUID string of a domain.
    fn domain_uuid(&self, domain: &DomainHandle) -> Result<String>;

    /// Interfaces and addresses reported by the lease mechanism.
    fn domain_interfaces(&self, domain: &DomainHandle) -> Result<Vec<NetworkInterface>>;

    /// First IPv4 address found across the domain's interfaces.
    ///
    /// `Ok(None)` when no interface has one; only the interface query itself
    /// can fail.
    fn domain_ipv4(&self, domain: &DomainHandle) -> Result<Option<String>> {
        let interfaces = self.domain_interfaces(domain)?;
        Ok(first_ipv4(&interfaces))
    }

    /// Register `callback` for `kind` events on `domain`.
    fn subscribe(
        &self,
        domain: &DomainHandle,
        kind: EventKind,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle>;

    /// Deregister a subscription. Unknown or already removed handles are ignored.
    fn unsubscribe(&self, handle: &SubscriptionHandle);

    /// Run one blocking iteration of the hypervisor event loop.
    ///
    /// Registered callbacks are invoked synchronously from inside this call.
    fn dispatch_events(&self) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    fn close(&self);

    /// Backend name (for logging/metrics).
    fn name(&self) -> &str;
}

/// First non-empty IPv4 address, searching interfaces and addresses in order.
pub fn first_ipv4(interfaces: &[NetworkInterface]) -> Option<String> {
    interfaces
        .iter()
        .flat_map(|iface| iface.addrs.iter())
        .find(|addr| addr.kind == AddressKind::Ipv4 && !addr.addr.is_empty())
        .map(|addr| addr.addr.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InterfaceAddress;

    fn iface(name: &str, addrs: &[(AddressKind, &str)]) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            hwaddr: "52:54:00:00:00:01".to_string(),
            addrs: addrs
                .iter()
                .map(|(kind, addr)| InterfaceAddress {
                    kind: *kind,
                    addr: addr.to_string(),
                    prefix: 24,
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_ipv4_skips_ipv6_and_empty() {
        let interfaces = vec![
            iface("vnet0", &[(AddressKind::Ipv6, "fe80::1"), (AddressKind::Ipv4, "")]),
            iface("vnet1", &[(AddressKind::Ipv4, "192.168.122.10")]),
            iface("vnet2", &[(AddressKind::Ipv4, "192.168.122.11")]),
        ];
        assert_eq!(first_ipv4(&interfaces).as_deref(), Some("192.168.122.10"));
    }

    #[test]
    fn test_first_ipv4_none() {
        assert_eq!(first_ipv4(&[]), None);
        let interfaces = vec![iface("vnet0", &[(AddressKind::Ipv6, "fe80::2")])];
        assert_eq!(first_ipv4(&interfaces), None);
    }
}
