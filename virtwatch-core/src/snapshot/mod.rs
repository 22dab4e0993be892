//! Snapshot aggregation.
//!
//! One pass turns the hypervisor's live domains into a list of `VmState`
//! values. Each domain is queried independently:
//!
//! | query             | on failure                                    |
//! |-------------------|-----------------------------------------------|
//! | `domain_info`     | domain skipped                                |
//! | `domain_disks`    | domain skipped                                |
//! | `volume_capacity` | volume left out of `disk_size` (still counted) |
//! | `domain_uuid`     | domain skipped                                |
//! | `domain_ipv4`     | domain emitted with an empty address          |
//!
//! Every omission is logged with the domain and the failing field. Only a
//! failure to list domains is returned to the caller.

use crate::client::HypervisorClient;
use crate::error::Result;
use crate::observability::metrics;
use crate::types::{DomainField, DomainHandle, VmState, VmStatus};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Builds `VmState` snapshots from a hypervisor client.
#[derive(Clone)]
pub struct SnapshotAggregator {
    client: Arc<dyn HypervisorClient>,
}

impl SnapshotAggregator {
    pub fn new(client: Arc<dyn HypervisorClient>) -> Self {
        Self { client }
    }

    /// Run one aggregation pass over all active domains.
    ///
    /// Output order follows the listing order; domains whose mandatory
    /// fields cannot be read are left out.
    #[instrument(skip(self), fields(backend = self.client.name()))]
    pub fn collect(&self) -> Result<Vec<VmState>> {
        let started = Instant::now();

        let domains = match self.client.list_active_domains() {
            Ok(domains) => domains,
            Err(e) => {
                error!(error = %e, "Failed to list active domains");
                metrics::record_snapshot_pass(false, started.elapsed().as_secs_f64());
                return Err(e);
            }
        };

        let total = domains.len();
        let vms: Vec<VmState> = domains.iter().filter_map(|domain| self.snapshot(domain)).collect();

        debug!(total, emitted = vms.len(), "Snapshot pass complete");
        metrics::record_snapshot_pass(true, started.elapsed().as_secs_f64());
        Ok(vms)
    }

    /// Build the snapshot of a single domain, or `None` if a mandatory field failed.
    pub fn snapshot(&self, domain: &DomainHandle) -> Option<VmState> {
        let info = self.mandatory(domain, DomainField::Info, self.client.domain_info(domain))?;
        let volumes = self.mandatory(domain, DomainField::Disks, self.client.domain_disks(domain))?;

        let disk_count = volumes.len();
        let disk_size = volumes
            .iter()
            .filter_map(|volume| match self.client.volume_capacity(domain, volume) {
                Ok(capacity) => Some(capacity),
                Err(e) => {
                    warn!(
                        domain = %domain,
                        volume = %volume.source,
                        error = %e,
                        "Excluding volume from disk size"
                    );
                    metrics::record_volume_capacity_failure();
                    None
                }
            })
            .fold(0u64, u64::saturating_add);

        let uuid = self.mandatory(domain, DomainField::Uuid, self.client.domain_uuid(domain))?;

        let ip_address = match self.client.domain_ipv4(domain) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                debug!(domain = %domain, "No IPv4 lease found");
                String::new()
            }
            Err(e) => {
                warn!(
                    domain = %domain,
                    field = %DomainField::Ipv4,
                    error = %e,
                    "IPv4 lookup failed"
                );
                String::new()
            }
        };

        Some(VmState {
            id: domain.name().to_string(),
            cpu: info.vcpus,
            memory: info.memory_bytes,
            disk_count,
            disk_size,
            uuid,
            ip_address,
            status: VmStatus::Running,
        })
    }

    fn mandatory<T>(
        &self,
        domain: &DomainHandle,
        field: DomainField,
        result: Result<T>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(domain = %domain, field = %field, error = %e, "Skipping domain");
                metrics::record_domain_skipped(field);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VirtwatchError;
    use crate::testing::{FakeClient, FakeDomain};

    fn aggregator(client: FakeClient) -> SnapshotAggregator {
        SnapshotAggregator::new(Arc::new(client))
    }

    #[test]
    fn test_full_snapshot() {
        let client = FakeClient::new().with_domain(
            FakeDomain::new("web-1")
                .vcpus(4)
                .memory(4 << 30)
                .volume("vda", 20 << 30)
                .volume("vdb", 5 << 30)
                .ipv4("192.168.122.10"),
        );

        let vms = aggregator(client).collect().unwrap();
        assert_eq!(vms.len(), 1);
        let vm = &vms[0];
        assert_eq!(vm.id, "web-1");
        assert_eq!(vm.cpu, 4);
        assert_eq!(vm.memory, 4 << 30);
        assert_eq!(vm.disk_count, 2);
        assert_eq!(vm.disk_size, 25 << 30);
        assert_eq!(vm.uuid, FakeDomain::uuid_for("web-1"));
        assert_eq!(vm.ip_address, "192.168.122.10");
        assert_eq!(vm.status, VmStatus::Running);
    }

    #[test]
    fn test_mandatory_field_failures_skip_domain() {
        let client = FakeClient::new()
            .with_domain(FakeDomain::new("a"))
            .with_domain(FakeDomain::new("b").fail(DomainField::Info))
            .with_domain(FakeDomain::new("c").fail(DomainField::Disks))
            .with_domain(FakeDomain::new("d").fail(DomainField::Uuid))
            .with_domain(FakeDomain::new("e"));

        let ids: Vec<String> =
            aggregator(client).collect().unwrap().into_iter().map(|vm| vm.id).collect();
        assert_eq!(ids, vec!["a", "e"]);
    }

    #[test]
    fn test_ipv4_failure_or_absence_keeps_domain() {
        let client = FakeClient::new()
            .with_domain(FakeDomain::new("no-lease"))
            .with_domain(FakeDomain::new("broken").fail(DomainField::Ipv4));

        let vms = aggregator(client).collect().unwrap();
        assert_eq!(vms.len(), 2);
        assert!(vms.iter().all(|vm| vm.ip_address.is_empty()));
    }

    #[test]
    fn test_failed_volume_counted_but_not_sized() {
        let client = FakeClient::new().with_domain(
            FakeDomain::new("db").volume("vda", 8 << 30).failing_volume("vdb"),
        );

        let vms = aggregator(client).collect().unwrap();
        assert_eq!(vms[0].disk_count, 2);
        assert_eq!(vms[0].disk_size, 8 << 30);
    }

    #[test]
    fn test_listing_failure_is_returned() {
        let client = FakeClient::new().with_domain(FakeDomain::new("a")).fail_listing();
        let err = aggregator(client).collect().unwrap_err();
        assert!(matches!(err, VirtwatchError::Connection { .. }));
    }

    #[test]
    fn test_output_is_ordered_subsequence() {
        let names = ["n0", "n1", "n2", "n3", "n4", "n5", "n6", "n7"];
        let mut client = FakeClient::new();
        for (i, name) in names.iter().enumerate() {
            let mut domain = FakeDomain::new(*name);
            if i % 3 == 1 {
                domain = domain.fail(DomainField::Uuid);
            }
            client = client.with_domain(domain);
        }

        let ids: Vec<String> =
            aggregator(client).collect().unwrap().into_iter().map(|vm| vm.id).collect();
        assert!(ids.len() <= names.len());
        let mut cursor = names.iter();
        for id in &ids {
            assert!(cursor.any(|name| *name == id.as_str()), "{} out of order", id);
        }
        assert_eq!(ids, vec!["n0", "n2", "n3", "n5", "n6"]);
    }

    #[test]
    fn test_empty_hypervisor() {
        let vms = aggregator(FakeClient::new()).collect().unwrap();
        assert!(vms.is_empty());
    }
}
